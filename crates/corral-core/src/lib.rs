//! # corral-core
//!
//! Sandbox lifecycle for corral: supervised `systemd-nspawn` containers,
//! each wired into a shared bridge through its own network namespace.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  LifecycleManager                        │
//! │   start() / stop() / cleanup() / state() / list()        │
//! ├──────────────┬──────────────────────┬────────────────────┤
//! │  ImageStore  │ AttachmentOrchestrator│    Supervisor     │
//! │  (rootfs)    │   (corral-net)        │  (systemd units)  │
//! └──────────────┴──────────────────────┴────────────────────┘
//!                           │
//!                           ▼
//!              stop: Escalation<StopSignal>
//!         graceful ─5s─▶ SIGTERM ─3s─▶ SIGKILL ─2s─▶ cleanup
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use corral_core::{DirectoryImages, LifecycleManager, ManagerConfig, SystemdSupervisor};
//! use corral_net::IpRoute;
//! use std::sync::Arc;
//!
//! # async fn example() -> corral_core::Result<()> {
//! let manager = LifecycleManager::new(
//!     Arc::new(IpRoute::new()),
//!     Arc::new(SystemdSupervisor::new()),
//!     Arc::new(DirectoryImages::new("/var/lib/corral/images")),
//!     ManagerConfig::default().with_bridge_addr("10.77.0.1/24"),
//! )?;
//!
//! manager.start("web").await?;
//! println!("web is {}", manager.state("web").await?);
//!
//! // Network and unit are reclaimed even if the stop has to force
//! manager.stop("web").await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod escalation;
mod image;
mod manager;
mod sandbox;
mod supervisor;

pub use config::{ManagerConfig, StopPolicy, DEFAULT_BRIDGE};
pub use error::{CoreError, Result};
pub use escalation::{Escalation, Outcome};
pub use image::{DirectoryImages, ImageStore};
pub use manager::LifecycleManager;
pub use sandbox::{SandboxName, SandboxRecord, SandboxState};
pub use supervisor::{StopSignal, Supervisor, SystemdSupervisor, UnitSpec};
