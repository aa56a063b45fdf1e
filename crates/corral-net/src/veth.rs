//! Veth pair management.
//!
//! Endpoint lifecycle: `NOT_EXISTS -> DOWN -> {UP, LOWERLAYERDOWN} -> NOT_EXISTS`.
//! A pair is always created and destroyed as a unit.

use crate::error::{NetError, ResourceKind, Result};
use crate::host::{LinkKind, LinkRecord, LinkState, NetHost};
use crate::naming::validate_veth_name;
use crate::target::Target;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A veth endpoint visible in the default namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethEndpoint {
    pub name: String,
    pub state: LinkState,
    /// Peer name, when the peer is also in the default namespace.
    pub peer: Option<String>,
    pub master: Option<String>,
}

impl From<LinkRecord> for VethEndpoint {
    fn from(link: LinkRecord) -> Self {
        Self {
            name: link.name,
            state: link.state,
            peer: link.peer,
            master: link.master,
        }
    }
}

/// One veth pair as seen from the default namespace.
///
/// `peer` is `None` when the other endpoint has been moved into a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPairView {
    pub endpoint: String,
    pub peer: Option<String>,
}

impl fmt::Display for VethPairView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.peer {
            Some(peer) => write!(f, "{} <-> {}", self.endpoint, peer),
            None => write!(f, "{} <-> (other namespace)", self.endpoint),
        }
    }
}

/// Diagnostic view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethInfo {
    pub name: String,
    pub admin_up: bool,
    pub state: LinkState,
    pub peer: Option<String>,
    pub master: Option<String>,
    pub addresses: Vec<String>,
}

impl fmt::Display for VethInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name:      {}", self.name)?;
        writeln!(
            f,
            "admin:     {}",
            if self.admin_up { "up" } else { "down" }
        )?;
        writeln!(f, "state:     {}", self.state)?;
        writeln!(
            f,
            "peer:      {}",
            self.peer.as_deref().unwrap_or("(other namespace)")
        )?;
        writeln!(f, "master:    {}", self.master.as_deref().unwrap_or("-"))?;
        if self.addresses.is_empty() {
            write!(f, "addresses: -")
        } else {
            write!(f, "addresses: {}", self.addresses.join(", "))
        }
    }
}

/// Creates, deletes, attaches and inspects veth pairs.
#[derive(Clone)]
pub struct VethManager {
    host: Arc<dyn NetHost>,
}

impl VethManager {
    pub fn new(host: Arc<dyn NetHost>) -> Self {
        Self { host }
    }

    async fn endpoint(&self, name: &str) -> Option<LinkRecord> {
        match self.host.link(None, name).await {
            Ok(Some(link)) if link.kind == LinkKind::Veth => Some(link),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(veth = %name, error = %e, "Link lookup failed");
                None
            }
        }
    }

    async fn require(&self, name: &str) -> Result<LinkRecord> {
        self.endpoint(name).await.ok_or_else(|| {
            tracing::error!(veth = %name, "Veth endpoint not found");
            NetError::not_found(ResourceKind::Veth, name)
        })
    }

    /// Check whether a veth endpoint exists in the default namespace.
    pub async fn exists(&self, name: &str) -> bool {
        self.endpoint(name).await.is_some()
    }

    /// Create a veth pair. Both endpoints start `DOWN`.
    ///
    /// Not idempotent: a pair is an exclusive resource, so a second create
    /// with either name fails with `AlreadyExists` and creates nothing.
    pub async fn create(&self, name: &str, peer: &str) -> Result<()> {
        validate_veth_name(name)?;
        validate_veth_name(peer)?;
        if name == peer {
            return Err(NetError::InvalidName {
                kind: ResourceKind::Veth,
                name: peer.to_string(),
                reason: "both endpoints have the same name".into(),
            });
        }

        for n in [name, peer] {
            if let Ok(Some(existing)) = self.host.link(None, n).await {
                let kind = if existing.kind == LinkKind::Veth {
                    ResourceKind::Veth
                } else {
                    ResourceKind::Link
                };
                tracing::error!(veth = %n, "Interface already exists");
                return Err(NetError::already_exists(kind, n));
            }
        }

        self.host.add_veth(name, peer).await?;
        tracing::info!(veth = %name, peer = %peer, "Veth pair created");
        Ok(())
    }

    /// Delete an endpoint, destroying its peer with it.
    ///
    /// Either endpoint's name can be used.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.require(name).await?;
        self.host.delete_link(name).await?;
        tracing::info!(veth = %name, "Veth pair deleted");
        Ok(())
    }

    /// Delete a pair by whichever of its two names still resolves.
    pub async fn delete_pair(&self, name: &str, peer: &str) -> Result<()> {
        for n in [name, peer] {
            if self.exists(n).await {
                return self.delete(n).await;
            }
        }
        tracing::error!(veth = %name, peer = %peer, "Neither endpoint exists");
        Err(NetError::not_found(ResourceKind::Veth, name))
    }

    /// Attach an endpoint to a target classified by probing the host.
    pub async fn attach(&self, name: &str, target: &str) -> Result<()> {
        let target = Target::classify(self.host.as_ref(), target)
            .await
            .inspect_err(|e| tracing::error!(veth = %name, error = %e, "Cannot attach"))?;
        self.attach_to(name, &target).await
    }

    /// Attach an endpoint to a known target.
    ///
    /// Bridge: enslave and bring the endpoint up. Namespace: move the
    /// endpoint in, then bring it and the namespace's loopback up from inside.
    pub async fn attach_to(&self, name: &str, target: &Target) -> Result<()> {
        self.require(name).await?;

        match target {
            Target::Bridge(bridge) => {
                self.host.set_master(name, Some(bridge)).await?;
                self.host.set_admin(None, name, true).await?;
            }
            Target::Namespace(netns) => {
                self.host.set_netns(name, netns).await?;
                self.host.set_admin(Some(netns), name, true).await?;
                if let Err(e) = self.host.set_admin(Some(netns), "lo", true).await {
                    tracing::warn!(netns = %netns, error = %e, "Failed to bring up loopback");
                }
            }
        }

        tracing::info!(veth = %name, %target, "Veth attached");
        Ok(())
    }

    /// Release an endpoint from its bridge.
    ///
    /// A `bridge_hint` that differs from the actual master only warns; the
    /// endpoint is released from whatever master it has.
    pub async fn detach(&self, name: &str, bridge_hint: Option<&str>) -> Result<()> {
        let link = self.require(name).await?;

        let Some(master) = link.master else {
            tracing::info!(veth = %name, "Veth has no master, nothing to detach");
            return Ok(());
        };
        if let Some(hint) = bridge_hint {
            if hint != master {
                tracing::warn!(
                    veth = %name,
                    expected = %hint,
                    actual = %master,
                    "Veth is attached to a different bridge"
                );
            }
        }

        self.host.set_master(name, None).await?;
        tracing::info!(veth = %name, bridge = %master, "Veth detached");
        Ok(())
    }

    /// Bring an endpoint administratively up.
    pub async fn up(&self, name: &str) -> Result<()> {
        self.require(name).await?;
        self.host.set_admin(None, name, true).await?;
        tracing::debug!(veth = %name, "Veth up");
        Ok(())
    }

    /// Bring an endpoint administratively down.
    pub async fn down(&self, name: &str) -> Result<()> {
        self.require(name).await?;
        self.host.set_admin(None, name, false).await?;
        tracing::debug!(veth = %name, "Veth down");
        Ok(())
    }

    /// Current state, `NOT_EXISTS` if the endpoint is absent.
    pub async fn state(&self, name: &str) -> LinkState {
        match self.endpoint(name).await {
            Some(link) => match link.state {
                s @ (LinkState::Up | LinkState::Down | LinkState::LowerLayerDown) => s,
                _ => LinkState::Unknown,
            },
            None => LinkState::NotExists,
        }
    }

    /// Current state, failing with `NotFound` if the endpoint is absent.
    pub async fn status(&self, name: &str) -> Result<LinkState> {
        match self.state(name).await {
            LinkState::NotExists => Err(NetError::not_found(ResourceKind::Veth, name)),
            state => Ok(state),
        }
    }

    /// All veth endpoints in the default namespace.
    pub async fn list(&self) -> Result<Vec<VethEndpoint>> {
        Ok(self
            .host
            .links(None)
            .await?
            .into_iter()
            .filter(|l| l.kind == LinkKind::Veth)
            .map(VethEndpoint::from)
            .collect())
    }

    /// Veth pairs, each reported exactly once.
    pub async fn list_pairs(&self) -> Result<Vec<VethPairView>> {
        let endpoints = self.list().await?;
        let names: HashSet<&str> = endpoints.iter().map(|e| e.name.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut pairs = Vec::new();

        for endpoint in &endpoints {
            if !seen.insert(endpoint.name.as_str()) {
                continue;
            }
            let peer = endpoint
                .peer
                .as_deref()
                .filter(|p| names.contains(p));
            if let Some(p) = peer {
                seen.insert(p);
            }
            pairs.push(VethPairView {
                endpoint: endpoint.name.clone(),
                peer: peer.map(str::to_string),
            });
        }

        Ok(pairs)
    }

    /// Detailed view of one endpoint.
    pub async fn info(&self, name: &str) -> Result<VethInfo> {
        let link = self.require(name).await?;
        let addresses = self.host.addresses(name).await?;
        Ok(VethInfo {
            name: link.name,
            admin_up: link.admin_up,
            state: link.state,
            peer: link.peer,
            master: link.master,
            addresses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{LinkControl, NamespaceControl};
    use crate::MemoryHost;

    fn setup() -> (Arc<MemoryHost>, VethManager) {
        let host = Arc::new(MemoryHost::new());
        let veths = VethManager::new(host.clone());
        (host, veths)
    }

    #[tokio::test]
    async fn test_create_enters_down() {
        let (_, veths) = setup();
        veths.create("a", "b").await.unwrap();
        assert_eq!(veths.status("a").await.unwrap(), LinkState::Down);
        assert_eq!(veths.status("b").await.unwrap(), LinkState::Down);
    }

    #[tokio::test]
    async fn test_create_rejects_same_names() {
        let (_, veths) = setup();
        let err = veths.create("a", "a").await.unwrap_err();
        assert!(matches!(err, NetError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_existing_non_veth() {
        let (host, veths) = setup();
        host.add_bridge("br0").await.unwrap();
        let err = veths.create("br0", "b").await.unwrap_err();
        assert!(matches!(
            err,
            NetError::AlreadyExists {
                kind: ResourceKind::Link,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_status_missing() {
        let (_, veths) = setup();
        assert_eq!(veths.state("nope").await, LinkState::NotExists);
        assert!(veths.status("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_up_down_missing() {
        let (_, veths) = setup();
        assert!(veths.up("nope").await.unwrap_err().is_not_found());
        assert!(veths.down("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_pair_by_either_name() {
        let (_, veths) = setup();
        veths.create("a", "b").await.unwrap();
        veths.delete_pair("gone", "b").await.unwrap();
        assert!(!veths.exists("a").await);
        assert!(!veths.exists("b").await);

        let err = veths.delete_pair("a", "b").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_attach_invalid_target() {
        let (_, veths) = setup();
        veths.create("a", "b").await.unwrap();
        let err = veths.attach("a", "nowhere").await.unwrap_err();
        assert!(matches!(err, NetError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn test_attach_missing_endpoint() {
        let (host, veths) = setup();
        host.add_bridge("br0").await.unwrap();
        let err = veths.attach("a", "br0").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_attach_namespace_brings_up_loopback() {
        let (host, veths) = setup();
        host.add_namespace("ns1").await.unwrap();
        veths.create("a", "b").await.unwrap();
        veths.attach("b", "ns1").await.unwrap();

        let lo = host.link(Some("ns1"), "lo").await.unwrap().unwrap();
        assert!(lo.admin_up);
        let b = host.link(Some("ns1"), "b").await.unwrap().unwrap();
        assert!(b.admin_up);
        assert!(!veths.exists("b").await);
    }

    #[tokio::test]
    async fn test_detach_with_mismatched_hint_still_detaches() {
        let (host, veths) = setup();
        host.add_bridge("br0").await.unwrap();
        veths.create("a", "b").await.unwrap();
        veths.attach("a", "br0").await.unwrap();

        veths.detach("a", Some("br1")).await.unwrap();
        let a = host.link(None, "a").await.unwrap().unwrap();
        assert!(a.master.is_none());
    }

    #[tokio::test]
    async fn test_detach_unattached_is_ok() {
        let (_, veths) = setup();
        veths.create("a", "b").await.unwrap();
        veths.detach("a", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_pairs_dedupes() {
        let (host, veths) = setup();
        host.add_namespace("ns1").await.unwrap();
        veths.create("a", "b").await.unwrap();
        veths.create("c", "d").await.unwrap();
        veths.attach("d", "ns1").await.unwrap();

        let pairs = veths.list_pairs().await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(
            pairs[0],
            VethPairView {
                endpoint: "a".into(),
                peer: Some("b".into())
            }
        );
        assert_eq!(
            pairs[1],
            VethPairView {
                endpoint: "c".into(),
                peer: None
            }
        );
        assert_eq!(veths.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_info() {
        let (host, veths) = setup();
        host.add_bridge("br0").await.unwrap();
        veths.create("a", "b").await.unwrap();
        veths.attach("a", "br0").await.unwrap();

        let info = veths.info("a").await.unwrap();
        assert_eq!(info.master.as_deref(), Some("br0"));
        assert_eq!(info.state, LinkState::LowerLayerDown);
        let text = info.to_string();
        assert!(text.contains("master:    br0"));
        assert!(text.contains("peer:      b"));
    }
}
