//! Bridge management.
//!
//! Bridges are shared infrastructure created lazily by many callers, so
//! [`BridgeManager::create`] succeeds on a bridge that already exists. This
//! differs from [`VethManager::create`](crate::VethManager::create), which
//! treats pre-existence as failure.

use crate::error::{NetError, ResourceKind, Result};
use crate::host::{LinkKind, LinkRecord, LinkState, NetHost};
use crate::naming::validate_bridge_name;
use crate::target::Target;
use crate::veth::VethManager;
use std::net::IpAddr;
use std::sync::Arc;

/// Check that `addr` is an `ip/prefix` pair with a prefix valid for its family.
pub fn validate_address(addr: &str) -> Result<()> {
    let invalid = || NetError::InvalidAddress(addr.to_string());
    let (ip, prefix) = addr.split_once('/').ok_or_else(invalid)?;
    let ip: IpAddr = ip.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok(())
}

/// Creates, deletes and inspects bridges, and attaches veth endpoints to them.
#[derive(Clone)]
pub struct BridgeManager {
    host: Arc<dyn NetHost>,
    veths: VethManager,
}

impl BridgeManager {
    pub fn new(host: Arc<dyn NetHost>) -> Self {
        Self {
            veths: VethManager::new(host.clone()),
            host,
        }
    }

    /// Check a bridge name: 1-15 characters of `[A-Za-z0-9_-]`.
    pub fn validate_name(name: &str) -> bool {
        validate_bridge_name(name).is_ok()
    }

    async fn bridge(&self, name: &str) -> Option<LinkRecord> {
        match self.host.link(None, name).await {
            Ok(Some(link)) if link.kind == LinkKind::Bridge => Some(link),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(bridge = %name, error = %e, "Link lookup failed");
                None
            }
        }
    }

    async fn require(&self, name: &str) -> Result<LinkRecord> {
        self.bridge(name).await.ok_or_else(|| {
            tracing::error!(bridge = %name, "Bridge not found");
            NetError::not_found(ResourceKind::Bridge, name)
        })
    }

    /// Check whether a bridge exists.
    pub async fn exists(&self, name: &str) -> bool {
        self.bridge(name).await.is_some()
    }

    /// Create a bridge, optionally assigning an address.
    ///
    /// Succeeds if the bridge already exists. An address already present on
    /// the bridge is not added again.
    pub async fn create(&self, name: &str, addr: Option<&str>) -> Result<()> {
        validate_bridge_name(name)?;
        if let Some(addr) = addr {
            validate_address(addr)?;
        }

        if self.exists(name).await {
            tracing::info!(bridge = %name, "Bridge already exists");
        } else {
            if let Ok(Some(_)) = self.host.link(None, name).await {
                tracing::error!(bridge = %name, "A non-bridge interface has this name");
                return Err(NetError::already_exists(ResourceKind::Link, name));
            }
            self.host.add_bridge(name).await?;
            tracing::info!(bridge = %name, "Bridge created");
        }

        if let Some(addr) = addr {
            let current = self.host.addresses(name).await?;
            if current.iter().any(|a| a == addr) {
                tracing::debug!(bridge = %name, %addr, "Address already assigned");
            } else {
                self.host.add_address(name, addr).await?;
                tracing::info!(bridge = %name, %addr, "Address assigned");
            }
        }
        Ok(())
    }

    /// Delete a bridge, bringing it down first.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.require(name).await?;
        if let Err(e) = self.host.set_admin(None, name, false).await {
            tracing::warn!(bridge = %name, error = %e, "Failed to bring bridge down before delete");
        }
        self.host.delete_link(name).await?;
        tracing::info!(bridge = %name, "Bridge deleted");
        Ok(())
    }

    /// Bring a bridge administratively up.
    pub async fn up(&self, name: &str) -> Result<()> {
        self.require(name).await?;
        self.host.set_admin(None, name, true).await?;
        tracing::debug!(bridge = %name, "Bridge up");
        Ok(())
    }

    /// Bring a bridge administratively down.
    pub async fn down(&self, name: &str) -> Result<()> {
        self.require(name).await?;
        self.host.set_admin(None, name, false).await?;
        tracing::debug!(bridge = %name, "Bridge down");
        Ok(())
    }

    /// Current state, `NOT_EXISTS` if the bridge is absent.
    pub async fn state(&self, name: &str) -> LinkState {
        match self.bridge(name).await {
            Some(link) => link.state,
            None => LinkState::NotExists,
        }
    }

    /// Current state, failing with `NotFound` if the bridge is absent.
    pub async fn status(&self, name: &str) -> Result<LinkState> {
        Ok(self.require(name).await?.state)
    }

    /// All bridges in the default namespace.
    pub async fn list(&self) -> Result<Vec<LinkRecord>> {
        Ok(self
            .host
            .links(None)
            .await?
            .into_iter()
            .filter(|l| l.kind == LinkKind::Bridge)
            .collect())
    }

    /// Names of the interfaces enslaved to a bridge.
    pub async fn members(&self, name: &str) -> Result<Vec<String>> {
        self.require(name).await?;
        Ok(self
            .host
            .links(None)
            .await?
            .into_iter()
            .filter(|l| l.master.as_deref() == Some(name))
            .map(|l| l.name)
            .collect())
    }

    /// Addresses assigned to a bridge.
    pub async fn addresses(&self, name: &str) -> Result<Vec<String>> {
        self.require(name).await?;
        self.host.addresses(name).await
    }

    /// Enslave a veth endpoint to an existing bridge and bring it up.
    pub async fn attach_endpoint(&self, name: &str, veth: &str) -> Result<()> {
        self.require(name).await?;
        self.veths
            .attach_to(veth, &Target::Bridge(name.to_string()))
            .await
    }

    /// Release a veth endpoint from this bridge.
    pub async fn detach_endpoint(&self, name: &str, veth: &str) -> Result<()> {
        self.veths.detach(veth, Some(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LinkControl;
    use crate::MemoryHost;

    fn setup() -> (Arc<MemoryHost>, BridgeManager) {
        let host = Arc::new(MemoryHost::new());
        let bridges = BridgeManager::new(host.clone());
        (host, bridges)
    }

    #[test]
    fn test_validate_name() {
        assert!(BridgeManager::validate_name("br0"));
        assert!(BridgeManager::validate_name("corral_br-01"));
        assert!(!BridgeManager::validate_name(""));
        assert!(!BridgeManager::validate_name("br.0"));
        assert!(!BridgeManager::validate_name("a-very-long-name"));
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("10.0.0.1/24").is_ok());
        assert!(validate_address("fd00::1/64").is_ok());
        assert!(validate_address("10.0.0.1").is_err());
        assert!(validate_address("10.0.0.1/33").is_err());
        assert!(validate_address("nope/24").is_err());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (host, bridges) = setup();
        bridges.create("br0", None).await.unwrap();
        bridges.create("br0", None).await.unwrap();
        assert_eq!(bridges.list().await.unwrap().len(), 1);
        assert_eq!(host.link_count(None), 2);
    }

    #[tokio::test]
    async fn test_create_does_not_duplicate_address() {
        let (_, bridges) = setup();
        bridges.create("br0", Some("10.0.0.1/24")).await.unwrap();
        bridges.create("br0", Some("10.0.0.1/24")).await.unwrap();
        bridges.create("br0", Some("10.0.1.1/24")).await.unwrap();
        assert_eq!(
            bridges.addresses("br0").await.unwrap(),
            vec!["10.0.0.1/24", "10.0.1.1/24"]
        );
    }

    #[tokio::test]
    async fn test_create_rejects_non_bridge_name_clash() {
        let (host, bridges) = setup();
        host.add_veth("a", "b").await.unwrap();
        let err = bridges.create("a", None).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_, bridges) = setup();
        bridges.create("br0", None).await.unwrap();
        bridges.up("br0").await.unwrap();
        bridges.delete("br0").await.unwrap();
        assert!(!bridges.exists("br0").await);
        assert!(bridges.delete("br0").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_status() {
        let (_, bridges) = setup();
        assert_eq!(bridges.state("br0").await, LinkState::NotExists);
        assert!(bridges.status("br0").await.is_err());

        bridges.create("br0", None).await.unwrap();
        assert_eq!(bridges.status("br0").await.unwrap(), LinkState::Down);
    }

    #[tokio::test]
    async fn test_attach_and_detach_endpoint() {
        let (host, bridges) = setup();
        bridges.create("br0", None).await.unwrap();
        host.add_veth("a", "b").await.unwrap();

        bridges.attach_endpoint("br0", "a").await.unwrap();
        assert_eq!(bridges.members("br0").await.unwrap(), vec!["a"]);

        bridges.detach_endpoint("br0", "a").await.unwrap();
        assert!(bridges.members("br0").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attach_endpoint_requires_bridge() {
        let (host, bridges) = setup();
        host.add_veth("a", "b").await.unwrap();
        let err = bridges.attach_endpoint("br0", "a").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
