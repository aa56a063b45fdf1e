//! Configuration for the corral CLI.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use corral_core::{DirectoryImages, ManagerConfig, StopPolicy, DEFAULT_BRIDGE};
use corral_net::{validate_address, BridgeManager};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the corral CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorralConfig {
    /// Bridge sandboxes are attached to.
    pub bridge: String,

    /// Address assigned to the bridge when it is created.
    pub bridge_addr: Option<String>,

    /// Directory holding one root filesystem directory per sandbox.
    pub image_root: PathBuf,

    /// Command run to create a missing image; `{dir}` is the target directory.
    pub bootstrap: Option<String>,

    /// Stop escalation timeouts.
    pub stop: StopPolicy,
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self {
            bridge: DEFAULT_BRIDGE.to_string(),
            bridge_addr: None,
            image_root: PathBuf::from("/var/lib/corral/images"),
            bootstrap: None,
            stop: StopPolicy::default(),
        }
    }
}

impl CorralConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CORRAL_BRIDGE` | `corral0` |
    /// | `CORRAL_BRIDGE_ADDR` | unset |
    /// | `CORRAL_IMAGE_ROOT` | `/var/lib/corral/images` |
    /// | `CORRAL_BOOTSTRAP` | unset |
    /// | `CORRAL_STOP_GRACEFUL_SECS` | `5` |
    /// | `CORRAL_STOP_TERMINATE_SECS` | `3` |
    /// | `CORRAL_STOP_KILL_SECS` | `2` |
    /// | `CORRAL_POLL_MS` | `500` |
    pub fn from_env() -> Self {
        let default = Self::default();

        let secs = |key: &str, fallback: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Self {
            bridge: std::env::var("CORRAL_BRIDGE").unwrap_or(default.bridge),
            bridge_addr: std::env::var("CORRAL_BRIDGE_ADDR")
                .ok()
                .filter(|v| !v.is_empty()),
            image_root: std::env::var("CORRAL_IMAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.image_root),
            bootstrap: std::env::var("CORRAL_BOOTSTRAP")
                .ok()
                .filter(|v| !v.is_empty()),
            stop: StopPolicy {
                graceful: secs("CORRAL_STOP_GRACEFUL_SECS", default.stop.graceful),
                terminate: secs("CORRAL_STOP_TERMINATE_SECS", default.stop.terminate),
                kill: secs("CORRAL_STOP_KILL_SECS", default.stop.kill),
                poll_interval: std::env::var("CORRAL_POLL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(default.stop.poll_interval),
            },
        }
    }

    /// Lifecycle manager settings derived from this configuration.
    pub fn manager_config(&self) -> ManagerConfig {
        let config = ManagerConfig::new(&self.bridge).with_stop_policy(self.stop);
        match &self.bridge_addr {
            Some(addr) => config.with_bridge_addr(addr),
            None => config,
        }
    }

    /// Image store rooted at `image_root`.
    pub fn images(&self) -> DirectoryImages {
        let images = DirectoryImages::new(&self.image_root);
        match &self.bootstrap {
            Some(template) => images.with_bootstrap(template),
            None => images,
        }
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if !BridgeManager::validate_name(&self.bridge) {
            tracing::warn!("Invalid bridge name: {:?}", self.bridge);
        }

        if let Some(addr) = &self.bridge_addr {
            if let Err(e) = validate_address(addr) {
                tracing::warn!("Invalid bridge address: {e}");
            }
        }

        if !self.image_root.exists() && self.bootstrap.is_none() {
            tracing::warn!("Image root not found: {:?}", self.image_root);
        }

        if self.stop.poll_interval.is_zero() {
            tracing::warn!("CORRAL_POLL_MS is 0, stop polling will spin");
        }
    }
}
