//! # corral-net
//!
//! Virtual network plumbing for corral sandboxes: veth pairs, bridges and
//! named network namespaces, composed into a single idempotent
//! "wire sandbox X into bridge Y" operation.
//!
//! ## Layers
//!
//! ```text
//! AttachmentOrchestrator
//!   ├── BridgeManager ──┐
//!   ├── VethManager  ◀──┘
//!   └── NamespaceManager
//!           │
//!           ▼
//!   NetHost (LinkControl + NamespaceControl)
//!   ├── IpRoute     (iproute2 on the real host)
//!   └── MemoryHost  (simulation)
//! ```
//!
//! Every manager queries the host live; nothing is cached.
//!
//! ## Quick Start
//!
//! ```no_run
//! use corral_net::{AttachmentOrchestrator, IpRoute};
//! use std::sync::Arc;
//!
//! # async fn example() -> corral_net::Result<()> {
//! let net = AttachmentOrchestrator::new(Arc::new(IpRoute::new()));
//!
//! // Bridge, namespace and veth pair are created as needed
//! net.attach("corral0", "web").await?;
//!
//! // Reclaims the veth pair and the namespace, never fails
//! let clean = net.cleanup("web", "corral0").await;
//! assert!(clean);
//! # Ok(())
//! # }
//! ```

mod attach;
mod bridge;
mod error;
mod host;
mod iproute;
mod memory;
mod namespace;
pub mod naming;
mod target;
mod veth;

pub use attach::AttachmentOrchestrator;
pub use bridge::{validate_address, BridgeManager};
pub use error::{NetError, ResourceKind, Result};
pub use host::{LinkControl, LinkKind, LinkRecord, LinkState, NamespaceControl, NetHost};
pub use iproute::IpRoute;
pub use memory::MemoryHost;
pub use namespace::NamespaceManager;
pub use naming::SandboxNetNames;
pub use target::Target;
pub use veth::{VethEndpoint, VethInfo, VethManager, VethPairView};
