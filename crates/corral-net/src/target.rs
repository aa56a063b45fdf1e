//! Attach targets.

use crate::error::{NetError, Result};
use crate::host::{LinkKind, NetHost};
use std::fmt;

/// Where a veth endpoint is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Enslave the endpoint to a bridge in the default namespace.
    Bridge(String),
    /// Move the endpoint into a named namespace.
    Namespace(String),
}

impl Target {
    /// Classify a bare name by probing the host.
    ///
    /// An existing bridge wins over a namespace of the same name. Fails with
    /// `InvalidTarget` when the name is neither.
    pub async fn classify(host: &dyn NetHost, name: &str) -> Result<Self> {
        match host.link(None, name).await {
            Ok(Some(link)) if link.kind == LinkKind::Bridge => {
                return Ok(Target::Bridge(name.to_string()));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(target_name = %name, error = %e, "Bridge probe failed"),
        }

        match host.namespaces().await {
            Ok(names) if names.iter().any(|n| n == name) => {
                Ok(Target::Namespace(name.to_string()))
            }
            Ok(_) => Err(NetError::InvalidTarget(name.to_string())),
            Err(e) => {
                tracing::debug!(target_name = %name, error = %e, "Namespace probe failed");
                Err(NetError::InvalidTarget(name.to_string()))
            }
        }
    }

    /// The bridge or namespace name.
    pub fn name(&self) -> &str {
        match self {
            Target::Bridge(name) | Target::Namespace(name) => name,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Bridge(name) => write!(f, "bridge {name}"),
            Target::Namespace(name) => write!(f, "namespace {name}"),
        }
    }
}
