//! Host control surfaces.
//!
//! Managers never cache host state; every query goes through these traits so
//! results stay correct across process boundaries. [`IpRoute`](crate::IpRoute)
//! drives the real host, [`MemoryHost`](crate::MemoryHost) simulates it.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Operational state of a link as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Administratively up and carrier present.
    Up,
    /// Administratively down.
    Down,
    /// Up locally but the lower layer (for veth: the peer) is down.
    LowerLayerDown,
    /// The link does not exist.
    NotExists,
    /// Any state the host reports that is not one of the above.
    Unknown,
}

impl LinkState {
    /// Map a kernel `operstate` string to a state.
    pub fn from_operstate(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "UP" => LinkState::Up,
            "DOWN" => LinkState::Down,
            "LOWERLAYERDOWN" => LinkState::LowerLayerDown,
            _ => LinkState::Unknown,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Up => write!(f, "UP"),
            LinkState::Down => write!(f, "DOWN"),
            LinkState::LowerLayerDown => write!(f, "LOWERLAYERDOWN"),
            LinkState::NotExists => write!(f, "NOT_EXISTS"),
            LinkState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Kind of a network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Veth,
    Bridge,
    Loopback,
    Other,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Veth => write!(f, "veth"),
            LinkKind::Bridge => write!(f, "bridge"),
            LinkKind::Loopback => write!(f, "loopback"),
            LinkKind::Other => write!(f, "other"),
        }
    }
}

/// Normalised view of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    /// Interface name.
    pub name: String,
    /// Link kind.
    pub kind: LinkKind,
    /// Administrative (`IFF_UP`) flag.
    pub admin_up: bool,
    /// Operational state.
    pub state: LinkState,
    /// Bridge this link is enslaved to, if any.
    pub master: Option<String>,
    /// Veth peer name, when the peer lives in the same namespace.
    pub peer: Option<String>,
}

/// Link and interface control surface.
///
/// `netns` selects the namespace an operation is issued in; `None` is the
/// caller's own (default) namespace.
#[async_trait]
pub trait LinkControl: Send + Sync {
    /// Look up one link. `Ok(None)` if it does not exist.
    async fn link(&self, netns: Option<&str>, name: &str) -> Result<Option<LinkRecord>>;

    /// List all links.
    async fn links(&self, netns: Option<&str>) -> Result<Vec<LinkRecord>>;

    /// Create a veth pair. Both endpoints are created or neither is.
    async fn add_veth(&self, name: &str, peer: &str) -> Result<()>;

    /// Create a bridge.
    async fn add_bridge(&self, name: &str) -> Result<()>;

    /// Delete a link. Deleting a veth endpoint destroys its peer too.
    async fn delete_link(&self, name: &str) -> Result<()>;

    /// Set the administrative state of a link.
    async fn set_admin(&self, netns: Option<&str>, name: &str, up: bool) -> Result<()>;

    /// Enslave a link to a bridge, or release it with `None`.
    async fn set_master(&self, name: &str, master: Option<&str>) -> Result<()>;

    /// Move a link into a named namespace.
    async fn set_netns(&self, name: &str, netns: &str) -> Result<()>;

    /// List addresses assigned to a link, in `addr/prefix` form.
    async fn addresses(&self, name: &str) -> Result<Vec<String>>;

    /// Assign an address (`addr/prefix`) to a link.
    async fn add_address(&self, name: &str, addr: &str) -> Result<()>;
}

/// Network namespace control surface.
#[async_trait]
pub trait NamespaceControl: Send + Sync {
    /// List named namespaces.
    async fn namespaces(&self) -> Result<Vec<String>>;

    /// Create a named namespace.
    async fn add_namespace(&self, name: &str) -> Result<()>;

    /// Delete a named namespace and everything inside it.
    async fn delete_namespace(&self, name: &str) -> Result<()>;
}

/// A host that offers both control surfaces.
pub trait NetHost: LinkControl + NamespaceControl {}

impl<T: LinkControl + NamespaceControl> NetHost for T {}
