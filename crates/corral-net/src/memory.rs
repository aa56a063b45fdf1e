//! In-memory host.
//!
//! Models the parts of Linux networking the managers rely on:
//! - a veth pair is created and destroyed as a unit;
//! - deleting a namespace destroys the links inside it, and the peers of any
//!   veth endpoints among them;
//! - moving a link into a namespace releases its master and takes it down;
//! - a veth endpoint is `LOWERLAYERDOWN` while its peer is down.

use crate::error::{NetError, ResourceKind, Result};
use crate::host::{LinkControl, LinkKind, LinkRecord, LinkState, NamespaceControl};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// `(namespace, interface name)`; `None` is the default namespace.
type LinkKey = (Option<String>, String);

#[derive(Debug, Clone)]
struct Link {
    kind: LinkKind,
    admin_up: bool,
    master: Option<String>,
    peer: Option<LinkKey>,
    addresses: Vec<String>,
}

impl Link {
    fn new(kind: LinkKind) -> Self {
        Self {
            kind,
            admin_up: false,
            master: None,
            peer: None,
            addresses: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    links: BTreeMap<LinkKey, Link>,
    namespaces: BTreeSet<String>,
}

impl State {
    fn get(&self, netns: Option<&str>, name: &str) -> Option<&Link> {
        self.links.get(&key(netns, name))
    }

    fn oper_state(&self, k: &LinkKey, link: &Link) -> LinkState {
        if !link.admin_up {
            return LinkState::Down;
        }
        match link.kind {
            LinkKind::Veth => match link.peer.as_ref().and_then(|p| self.links.get(p)) {
                Some(peer) if peer.admin_up => LinkState::Up,
                _ => LinkState::LowerLayerDown,
            },
            LinkKind::Bridge => {
                let carrier = self.links.iter().any(|(mk, member)| {
                    mk.0 == k.0
                        && member.master.as_deref() == Some(k.1.as_str())
                        && self.oper_state(mk, member) == LinkState::Up
                });
                if carrier {
                    LinkState::Up
                } else {
                    LinkState::Down
                }
            }
            LinkKind::Loopback | LinkKind::Other => LinkState::Unknown,
        }
    }

    fn record(&self, k: &LinkKey, link: &Link) -> LinkRecord {
        // Like the kernel, only name the peer when it shares our namespace.
        let peer = link
            .peer
            .as_ref()
            .filter(|p| p.0 == k.0)
            .map(|p| p.1.clone());
        LinkRecord {
            name: k.1.clone(),
            kind: link.kind,
            admin_up: link.admin_up,
            state: self.oper_state(k, link),
            master: link.master.clone(),
            peer,
        }
    }

    fn require(&mut self, netns: Option<&str>, name: &str) -> Result<&mut Link> {
        self.links
            .get_mut(&key(netns, name))
            .ok_or_else(|| NetError::not_found(ResourceKind::Link, name))
    }

    /// Remove a link, its veth peer, and any bridge membership pointing at it.
    fn remove(&mut self, k: &LinkKey) {
        let Some(link) = self.links.remove(k) else {
            return;
        };
        if let Some(peer) = link.peer {
            self.links.remove(&peer);
        }
        if link.kind == LinkKind::Bridge {
            for (mk, member) in self.links.iter_mut() {
                if mk.0 == k.0 && member.master.as_deref() == Some(k.1.as_str()) {
                    member.master = None;
                }
            }
        }
    }
}

fn key(netns: Option<&str>, name: &str) -> LinkKey {
    (netns.map(str::to_string), name.to_string())
}

/// Simulated host holding all state in memory.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<State>,
}

impl MemoryHost {
    /// Create an empty host with only a loopback in the default namespace.
    pub fn new() -> Self {
        let host = Self::default();
        host.lock()
            .links
            .insert(key(None, "lo"), Link::new(LinkKind::Loopback));
        host
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of links in a namespace, loopback included.
    pub fn link_count(&self, netns: Option<&str>) -> usize {
        let netns = netns.map(str::to_string);
        self.lock().links.keys().filter(|k| k.0 == netns).count()
    }
}

#[async_trait]
impl LinkControl for MemoryHost {
    async fn link(&self, netns: Option<&str>, name: &str) -> Result<Option<LinkRecord>> {
        let state = self.lock();
        if let Some(ns) = netns {
            if !state.namespaces.contains(ns) {
                return Err(NetError::not_found(ResourceKind::Namespace, ns));
            }
        }
        let k = key(netns, name);
        Ok(state.links.get(&k).map(|l| state.record(&k, l)))
    }

    async fn links(&self, netns: Option<&str>) -> Result<Vec<LinkRecord>> {
        let state = self.lock();
        let ns = netns.map(str::to_string);
        Ok(state
            .links
            .iter()
            .filter(|(k, _)| k.0 == ns)
            .map(|(k, l)| state.record(k, l))
            .collect())
    }

    async fn add_veth(&self, name: &str, peer: &str) -> Result<()> {
        let mut state = self.lock();
        for n in [name, peer] {
            if state.get(None, n).is_some() {
                return Err(NetError::already_exists(ResourceKind::Link, n));
            }
        }
        if name == peer {
            return Err(NetError::already_exists(ResourceKind::Link, peer));
        }

        let mut a = Link::new(LinkKind::Veth);
        a.peer = Some(key(None, peer));
        let mut b = Link::new(LinkKind::Veth);
        b.peer = Some(key(None, name));
        state.links.insert(key(None, name), a);
        state.links.insert(key(None, peer), b);
        Ok(())
    }

    async fn add_bridge(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.get(None, name).is_some() {
            return Err(NetError::already_exists(ResourceKind::Link, name));
        }
        state
            .links
            .insert(key(None, name), Link::new(LinkKind::Bridge));
        Ok(())
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        let k = key(None, name);
        if !state.links.contains_key(&k) {
            return Err(NetError::not_found(ResourceKind::Link, name));
        }
        state.remove(&k);
        Ok(())
    }

    async fn set_admin(&self, netns: Option<&str>, name: &str, up: bool) -> Result<()> {
        self.lock().require(netns, name)?.admin_up = up;
        Ok(())
    }

    async fn set_master(&self, name: &str, master: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        if let Some(bridge) = master {
            match state.get(None, bridge) {
                Some(l) if l.kind == LinkKind::Bridge => {}
                _ => return Err(NetError::not_found(ResourceKind::Bridge, bridge)),
            }
        }
        state.require(None, name)?.master = master.map(str::to_string);
        Ok(())
    }

    async fn set_netns(&self, name: &str, netns: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.namespaces.contains(netns) {
            return Err(NetError::not_found(ResourceKind::Namespace, netns));
        }
        let from = key(None, name);
        let to = key(Some(netns), name);
        if state.links.contains_key(&to) {
            return Err(NetError::already_exists(ResourceKind::Link, name));
        }
        let mut link = state
            .links
            .remove(&from)
            .ok_or_else(|| NetError::not_found(ResourceKind::Link, name))?;
        link.master = None;
        link.admin_up = false;
        if let Some(peer) = link.peer.as_ref().and_then(|p| state.links.get_mut(p)) {
            peer.peer = Some(to.clone());
        }
        state.links.insert(to, link);
        Ok(())
    }

    async fn addresses(&self, name: &str) -> Result<Vec<String>> {
        let state = self.lock();
        state
            .get(None, name)
            .map(|l| l.addresses.clone())
            .ok_or_else(|| NetError::not_found(ResourceKind::Link, name))
    }

    async fn add_address(&self, name: &str, addr: &str) -> Result<()> {
        let mut state = self.lock();
        let link = state.require(None, name)?;
        if link.addresses.iter().any(|a| a == addr) {
            return Err(NetError::already_exists(ResourceKind::Link, addr));
        }
        link.addresses.push(addr.to_string());
        Ok(())
    }
}

#[async_trait]
impl NamespaceControl for MemoryHost {
    async fn namespaces(&self) -> Result<Vec<String>> {
        Ok(self.lock().namespaces.iter().cloned().collect())
    }

    async fn add_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.namespaces.insert(name.to_string()) {
            return Err(NetError::already_exists(ResourceKind::Namespace, name));
        }
        state
            .links
            .insert(key(Some(name), "lo"), Link::new(LinkKind::Loopback));
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.namespaces.remove(name) {
            return Err(NetError::not_found(ResourceKind::Namespace, name));
        }
        let inside: Vec<LinkKey> = state
            .links
            .keys()
            .filter(|k| k.0.as_deref() == Some(name))
            .cloned()
            .collect();
        for k in inside {
            state.remove(&k);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state_of(host: &MemoryHost, netns: Option<&str>, name: &str) -> LinkState {
        host.link(netns, name)
            .await
            .unwrap()
            .map(|l| l.state)
            .unwrap_or(LinkState::NotExists)
    }

    #[tokio::test]
    async fn test_veth_state_follows_peer() {
        let host = MemoryHost::new();
        host.add_veth("a", "b").await.unwrap();
        assert_eq!(state_of(&host, None, "a").await, LinkState::Down);

        host.set_admin(None, "a", true).await.unwrap();
        assert_eq!(state_of(&host, None, "a").await, LinkState::LowerLayerDown);

        host.set_admin(None, "b", true).await.unwrap();
        assert_eq!(state_of(&host, None, "a").await, LinkState::Up);
        assert_eq!(state_of(&host, None, "b").await, LinkState::Up);
    }

    #[tokio::test]
    async fn test_delete_either_endpoint_removes_pair() {
        let host = MemoryHost::new();
        host.add_veth("a", "b").await.unwrap();
        host.delete_link("b").await.unwrap();
        assert!(host.link(None, "a").await.unwrap().is_none());
        assert_eq!(host.link_count(None), 1);
    }

    #[tokio::test]
    async fn test_namespace_delete_destroys_peer() {
        let host = MemoryHost::new();
        host.add_namespace("ns1").await.unwrap();
        host.add_veth("a", "b").await.unwrap();
        host.set_netns("b", "ns1").await.unwrap();
        assert!(host.link(None, "b").await.unwrap().is_none());
        assert!(host.link(Some("ns1"), "b").await.unwrap().is_some());

        host.delete_namespace("ns1").await.unwrap();
        assert!(host.link(None, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bridge_delete_releases_members() {
        let host = MemoryHost::new();
        host.add_bridge("br0").await.unwrap();
        host.add_veth("a", "b").await.unwrap();
        host.set_master("a", Some("br0")).await.unwrap();

        host.delete_link("br0").await.unwrap();
        let a = host.link(None, "a").await.unwrap().unwrap();
        assert!(a.master.is_none());
    }

    #[tokio::test]
    async fn test_set_master_requires_bridge() {
        let host = MemoryHost::new();
        host.add_veth("a", "b").await.unwrap();
        let err = host.set_master("a", Some("b")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_add_veth_is_atomic() {
        let host = MemoryHost::new();
        host.add_veth("a", "b").await.unwrap();
        let err = host.add_veth("c", "b").await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(host.link(None, "c").await.unwrap().is_none());
    }
}
