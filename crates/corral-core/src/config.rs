//! Lifecycle manager configuration.

use crate::error::{CoreError, Result};
use crate::escalation::Escalation;
use crate::supervisor::StopSignal;
use corral_net::{validate_address, BridgeManager};
use std::time::Duration;

/// Default bridge sandboxes are attached to.
pub const DEFAULT_BRIDGE: &str = "corral0";

/// Timeouts for the stop escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Wait after a graceful stop request (default: 5s).
    pub graceful: Duration,
    /// Wait after SIGTERM (default: 3s).
    pub terminate: Duration,
    /// Wait after SIGKILL (default: 2s).
    pub kill: Duration,
    /// Interval between liveness checks (default: 500ms).
    pub poll_interval: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            graceful: Duration::from_secs(5),
            terminate: Duration::from_secs(3),
            kill: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl StopPolicy {
    /// Graceful, then SIGTERM, then SIGKILL.
    pub fn escalation(&self) -> Escalation<StopSignal> {
        Escalation::new(self.poll_interval)
            .stage(StopSignal::Graceful, self.graceful)
            .stage(StopSignal::Terminate, self.terminate)
            .stage(StopSignal::Kill, self.kill)
    }

    /// Upper bound on time spent waiting in a stop.
    pub fn total(&self) -> Duration {
        self.graceful + self.terminate + self.kill
    }
}

/// Configuration for [`LifecycleManager`](crate::LifecycleManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Bridge every sandbox is attached to.
    pub bridge: String,
    /// Address assigned to the bridge, e.g. `10.77.0.1/24`.
    pub bridge_addr: Option<String>,
    pub stop: StopPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BRIDGE)
    }
}

impl ManagerConfig {
    pub fn new(bridge: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            bridge_addr: None,
            stop: StopPolicy::default(),
        }
    }

    pub fn with_bridge_addr(mut self, addr: impl Into<String>) -> Self {
        self.bridge_addr = Some(addr.into());
        self
    }

    pub fn with_stop_policy(mut self, stop: StopPolicy) -> Self {
        self.stop = stop;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !BridgeManager::validate_name(&self.bridge) {
            return Err(CoreError::InvalidConfig(format!(
                "invalid bridge name {:?}",
                self.bridge
            )));
        }
        if let Some(addr) = &self.bridge_addr {
            validate_address(addr).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        }
        if self.stop.poll_interval.is_zero() {
            return Err(CoreError::InvalidConfig("poll interval must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.bridge, "corral0");
        assert_eq!(config.bridge_addr, None);
        assert_eq!(config.stop.total(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_escalation_stages() {
        let stages: Vec<_> = StopPolicy::default()
            .escalation()
            .stages()
            .iter()
            .map(|s| (s.signal, s.timeout.as_secs()))
            .collect();
        assert_eq!(
            stages,
            vec![
                (StopSignal::Graceful, 5),
                (StopSignal::Terminate, 3),
                (StopSignal::Kill, 2)
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ManagerConfig::new("br.0").validate().is_err());
        assert!(ManagerConfig::default()
            .with_bridge_addr("10.0.0.1")
            .validate()
            .is_err());

        let stop = StopPolicy {
            poll_interval: Duration::ZERO,
            ..StopPolicy::default()
        };
        assert!(ManagerConfig::default()
            .with_stop_policy(stop)
            .validate()
            .is_err());
    }
}
