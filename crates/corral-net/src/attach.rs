//! Attachment orchestration: wiring a sandbox into a bridge and back out.
//!
//! The orchestrator exclusively owns each sandbox's veth pair and namespace.
//!
//! ```text
//!            default namespace                 |  corral-<sandbox>
//!                                              |
//!   [bridge] ── vh-<sandbox> <══ veth ══> host0 ── lo
//! ```

use crate::bridge::BridgeManager;
use crate::error::{NetError, ResourceKind, Result};
use crate::host::NetHost;
use crate::namespace::NamespaceManager;
use crate::naming::SandboxNetNames;
use crate::target::Target;
use crate::veth::VethManager;
use std::sync::Arc;

/// Composes the namespace, veth and bridge managers into idempotent
/// per-sandbox attach, detach and cleanup operations.
#[derive(Clone)]
pub struct AttachmentOrchestrator {
    namespaces: NamespaceManager,
    veths: VethManager,
    bridges: BridgeManager,
}

impl AttachmentOrchestrator {
    pub fn new(host: Arc<dyn NetHost>) -> Self {
        Self {
            namespaces: NamespaceManager::new(host.clone()),
            veths: VethManager::new(host.clone()),
            bridges: BridgeManager::new(host),
        }
    }

    pub fn namespaces(&self) -> &NamespaceManager {
        &self.namespaces
    }

    pub fn veths(&self) -> &VethManager {
        &self.veths
    }

    pub fn bridges(&self) -> &BridgeManager {
        &self.bridges
    }

    /// Wire `sandbox` into `bridge`.
    ///
    /// 1. Ensure the bridge exists.
    /// 2. Ensure the sandbox namespace exists.
    /// 3. Create the sandbox veth pair.
    /// 4. Enslave the host side to the bridge.
    /// 5. Bring the bridge up.
    /// 6. Move the sandbox side into the namespace and bring it up.
    ///
    /// The bridge is up before step 6 so forwarding is live the moment the
    /// sandbox side appears. A failure after step 3 deletes the pair before
    /// returning.
    pub async fn attach(&self, bridge: &str, sandbox: &str) -> Result<()> {
        let names = SandboxNetNames::for_sandbox(sandbox)?;
        tracing::info!(%sandbox, %bridge, "Attaching sandbox network");

        self.bridges.create(bridge, None).await?;
        self.namespaces.ensure(&names.namespace).await?;
        self.veths
            .create(&names.host_veth, &names.container_veth)
            .await?;

        let wired = async {
            self.veths
                .attach_to(&names.host_veth, &Target::Bridge(bridge.to_string()))
                .await?;
            self.bridges.up(bridge).await?;
            self.veths
                .attach_to(
                    &names.container_veth,
                    &Target::Namespace(names.namespace.clone()),
                )
                .await
        }
        .await;

        if let Err(e) = wired {
            tracing::error!(%sandbox, %bridge, error = %e, "Attach failed, removing veth pair");
            if let Err(rollback) = self
                .veths
                .delete_pair(&names.host_veth, &names.container_veth)
                .await
            {
                tracing::warn!(%sandbox, error = %rollback, "Rollback of veth pair failed");
            }
            return Err(e);
        }

        tracing::info!(
            %sandbox,
            %bridge,
            veth = %names.host_veth,
            netns = %names.namespace,
            "Sandbox network attached"
        );
        Ok(())
    }

    /// Remove `sandbox` from `bridge`.
    ///
    /// Deleting the host-side veth destroys the pair, which also removes the
    /// sandbox side from its namespace. A missing veth counts as detached.
    pub async fn detach(&self, bridge: &str, sandbox: &str) -> Result<()> {
        let names = SandboxNetNames::for_sandbox(sandbox)?;
        if !self.bridges.exists(bridge).await {
            tracing::error!(%sandbox, %bridge, "Cannot detach from missing bridge");
            return Err(NetError::not_found(ResourceKind::Bridge, bridge));
        }

        if self.veths.exists(&names.host_veth).await {
            self.veths.delete(&names.host_veth).await?;
            tracing::info!(%sandbox, %bridge, "Sandbox network detached");
        } else {
            tracing::info!(%sandbox, %bridge, "Sandbox network already detached");
        }
        Ok(())
    }

    /// Tear down everything the orchestrator owns for `sandbox`.
    ///
    /// Never fails: sub-failures are logged as warnings. Returns `true` when
    /// neither the sandbox veth nor its namespace remain afterwards.
    pub async fn cleanup(&self, sandbox: &str, bridge: &str) -> bool {
        let names = match SandboxNetNames::for_sandbox(sandbox) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(%sandbox, error = %e, "Skipping network cleanup");
                return false;
            }
        };

        if let Err(e) = self.detach(bridge, sandbox).await {
            tracing::warn!(%sandbox, %bridge, error = %e, "Detach during cleanup failed");
        }

        if self.namespaces.exists(&names.namespace).await {
            if let Err(e) = self.namespaces.delete(&names.namespace).await {
                tracing::warn!(%sandbox, netns = %names.namespace, error = %e, "Namespace delete during cleanup failed");
            }
        }

        let veth_left = self.veths.exists(&names.host_veth).await;
        let netns_left = self.namespaces.exists(&names.namespace).await;
        if veth_left || netns_left {
            tracing::warn!(%sandbox, veth_left, netns_left, "Network cleanup left resources behind");
            return false;
        }
        tracing::debug!(%sandbox, "Network cleanup complete");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{LinkControl, LinkRecord, LinkState, NamespaceControl};
    use crate::MemoryHost;

    fn setup() -> (Arc<MemoryHost>, AttachmentOrchestrator) {
        let host = Arc::new(MemoryHost::new());
        let orch = AttachmentOrchestrator::new(host.clone());
        (host, orch)
    }

    #[tokio::test]
    async fn test_attach_wires_everything() {
        let (host, orch) = setup();
        orch.attach("br0", "web").await.unwrap();

        assert!(orch.bridges().exists("br0").await);
        assert!(orch.namespaces().exists("corral-web").await);
        assert_eq!(orch.bridges().members("br0").await.unwrap(), vec!["vh-web"]);
        assert_eq!(orch.veths().state("vh-web").await, LinkState::Up);
        assert!(!orch.veths().exists("host0").await);

        let inner = host.link(Some("corral-web"), "host0").await.unwrap().unwrap();
        assert_eq!(inner.state, LinkState::Up);
    }

    #[tokio::test]
    async fn test_attach_rejects_bad_sandbox_name() {
        let (host, orch) = setup();
        let err = orch.attach("br0", "much-too-long").await.unwrap_err();
        assert!(matches!(err, NetError::InvalidName { .. }));
        assert_eq!(host.link_count(None), 1);
    }

    #[tokio::test]
    async fn test_attach_twice_fails_without_side_effects() {
        let (_, orch) = setup();
        orch.attach("br0", "web").await.unwrap();
        let err = orch.attach("br0", "web").await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(orch.veths().state("vh-web").await, LinkState::Up);
    }

    #[tokio::test]
    async fn test_attach_fails_when_bridge_name_is_taken() {
        let (host, orch) = setup();
        host.add_veth("br0", "squat").await.unwrap();
        assert!(orch.attach("br0", "web").await.is_err());
        assert!(!orch.veths().exists("vh-web").await);
        assert!(!orch.namespaces().exists("corral-web").await);
    }

    #[tokio::test]
    async fn test_attach_rolls_back_pair_when_namespace_move_fails() {
        let (host, orch) = setup();
        // A stale host0 already inside the namespace blocks the move.
        host.add_namespace("corral-web").await.unwrap();
        host.add_veth("stale", "host0").await.unwrap();
        host.set_netns("host0", "corral-web").await.unwrap();

        let err = orch.attach("br0", "web").await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(!orch.veths().exists("vh-web").await);
        assert!(!orch.veths().exists("host0").await);
        assert!(orch.bridges().members("br0").await.unwrap().is_empty());
    }

    /// Host whose bridge enslavement always fails.
    struct NoEnslave(MemoryHost);

    #[async_trait::async_trait]
    impl LinkControl for NoEnslave {
        async fn link(&self, netns: Option<&str>, name: &str) -> Result<Option<LinkRecord>> {
            self.0.link(netns, name).await
        }
        async fn links(&self, netns: Option<&str>) -> Result<Vec<LinkRecord>> {
            self.0.links(netns).await
        }
        async fn add_veth(&self, name: &str, peer: &str) -> Result<()> {
            self.0.add_veth(name, peer).await
        }
        async fn add_bridge(&self, name: &str) -> Result<()> {
            self.0.add_bridge(name).await
        }
        async fn delete_link(&self, name: &str) -> Result<()> {
            self.0.delete_link(name).await
        }
        async fn set_admin(&self, netns: Option<&str>, name: &str, up: bool) -> Result<()> {
            self.0.set_admin(netns, name, up).await
        }
        async fn set_master(&self, name: &str, master: Option<&str>) -> Result<()> {
            match master {
                Some(_) => Err(NetError::Command {
                    program: "ip".into(),
                    args: format!("link set {name} master"),
                    stderr: "Operation not permitted".into(),
                }),
                None => self.0.set_master(name, None).await,
            }
        }
        async fn set_netns(&self, name: &str, netns: &str) -> Result<()> {
            self.0.set_netns(name, netns).await
        }
        async fn addresses(&self, name: &str) -> Result<Vec<String>> {
            self.0.addresses(name).await
        }
        async fn add_address(&self, name: &str, addr: &str) -> Result<()> {
            self.0.add_address(name, addr).await
        }
    }

    #[async_trait::async_trait]
    impl NamespaceControl for NoEnslave {
        async fn namespaces(&self) -> Result<Vec<String>> {
            self.0.namespaces().await
        }
        async fn add_namespace(&self, name: &str) -> Result<()> {
            self.0.add_namespace(name).await
        }
        async fn delete_namespace(&self, name: &str) -> Result<()> {
            self.0.delete_namespace(name).await
        }
    }

    #[tokio::test]
    async fn test_attach_rolls_back_pair_when_enslave_fails() {
        let host = Arc::new(NoEnslave(MemoryHost::new()));
        let orch = AttachmentOrchestrator::new(host.clone());

        let err = orch.attach("br0", "web").await.unwrap_err();
        assert!(matches!(err, NetError::Command { .. }));
        assert!(!orch.veths().exists("vh-web").await);
        assert!(!orch.veths().exists("host0").await);
        assert!(host.0.link(Some("corral-web"), "host0").await.unwrap().is_none());
        assert!(orch.bridges().members("br0").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let (_, orch) = setup();
        orch.attach("br0", "web").await.unwrap();
        orch.detach("br0", "web").await.unwrap();
        assert!(!orch.veths().exists("vh-web").await);
        orch.detach("br0", "web").await.unwrap();
    }

    #[tokio::test]
    async fn test_detach_missing_bridge() {
        let (_, orch) = setup();
        assert!(orch.detach("br0", "web").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cleanup_removes_everything() {
        let (_, orch) = setup();
        orch.attach("br0", "web").await.unwrap();
        assert!(orch.cleanup("web", "br0").await);
        assert!(!orch.namespaces().exists("corral-web").await);
        assert!(!orch.veths().exists("vh-web").await);
        assert!(orch.bridges().exists("br0").await);
    }

    #[tokio::test]
    async fn test_cleanup_on_nothing_is_healthy() {
        let (_, orch) = setup();
        assert!(orch.cleanup("web", "br0").await);
    }

    #[tokio::test]
    async fn test_cleanup_without_bridge_still_reclaims_pair() {
        let (host, orch) = setup();
        orch.attach("br0", "web").await.unwrap();
        host.delete_link("br0").await.unwrap();

        assert!(orch.cleanup("web", "br0").await);
        assert!(!orch.veths().exists("vh-web").await);
    }
}
