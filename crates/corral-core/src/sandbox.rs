//! Sandbox identity and lifecycle state.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use corral_net::{NetError, SandboxNetNames};
use std::fmt;

/// Validated sandbox name.
///
/// Every host resource a sandbox owns is named after it, so the name must be
/// short enough that the derived veth name fits the interface name limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxName(String);

impl SandboxName {
    /// Validate and wrap a sandbox name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        match corral_net::naming::validate_sandbox_name(&name) {
            Ok(()) => Ok(Self(name)),
            Err(NetError::InvalidName { reason, .. }) => Err(CoreError::InvalidName { name, reason }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host network resource names owned by this sandbox.
    pub fn net_names(&self) -> SandboxNetNames {
        // The name was validated on construction.
        SandboxNetNames {
            host_veth: format!("{}{}", corral_net::naming::HOST_VETH_PREFIX, self.0),
            container_veth: corral_net::naming::CONTAINER_VETH.to_string(),
            namespace: format!("{}{}", corral_net::naming::NAMESPACE_PREFIX, self.0),
        }
    }

    /// Name of the supervising unit.
    pub fn unit(&self) -> String {
        format!("corral-{}.service", self.0)
    }
}

impl fmt::Display for SandboxName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a sandbox.
///
/// `STOPPED -> STARTING -> RUNNING -> STOPPING -> {STOPPED, FAILED}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Start or stop did not complete; cleanup has already run.
    Failed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Tracked view of one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRecord {
    pub name: SandboxName,
    pub state: SandboxState,
    /// When the sandbox last entered `RUNNING`.
    pub started_at: Option<DateTime<Utc>>,
}

impl SandboxRecord {
    pub(crate) fn new(name: SandboxName) -> Self {
        Self {
            name,
            state: SandboxState::Stopped,
            started_at: None,
        }
    }
}
