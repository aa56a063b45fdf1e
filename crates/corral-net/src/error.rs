//! Error types for corral-net.

use std::fmt;
use thiserror::Error;

/// Result type alias for corral-net operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// Kind of host resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A veth endpoint.
    Veth,
    /// A bridge interface.
    Bridge,
    /// A named network namespace.
    Namespace,
    /// A sandbox name used to derive other resource names.
    Sandbox,
    /// Any other network interface.
    Link,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Veth => write!(f, "veth"),
            ResourceKind::Bridge => write!(f, "bridge"),
            ResourceKind::Namespace => write!(f, "namespace"),
            ResourceKind::Sandbox => write!(f, "sandbox"),
            ResourceKind::Link => write!(f, "link"),
        }
    }
}

/// Errors that can occur while manipulating host networking state.
#[derive(Debug, Error)]
pub enum NetError {
    /// Name violates the length or charset contract
    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    /// Create attempted on a resource that is already present
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// Operation attempted on an absent resource
    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    /// Attach target is neither an existing bridge nor an existing namespace
    #[error("{0} is neither an existing bridge nor a network namespace")]
    InvalidTarget(String),

    /// Malformed interface address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A host command exited unsuccessfully
    #[error("`{program} {args}` failed: {stderr}")]
    Command {
        program: String,
        args: String,
        stderr: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparseable command output
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetError {
    pub(crate) fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        NetError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        NetError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Check if this error indicates a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetError::NotFound { .. })
    }

    /// Check if this error indicates a resource that already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, NetError::AlreadyExists { .. })
    }
}
