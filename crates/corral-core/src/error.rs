//! Error types for corral-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for corral-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during sandbox lifecycle operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from corral-net
    #[error("network error: {0}")]
    Net(#[from] corral_net::NetError),

    /// Sandbox name is not usable
    #[error("invalid sandbox name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The supervising unit could not be created
    #[error("launch failed: {0}")]
    LaunchFailed(String),

    /// The sandbox was still running after every stop stage
    #[error("stop failed: {0}")]
    StopFailed(String),

    /// No root filesystem for the sandbox and none could be made
    #[error("sandbox image not found: {}", .0.display())]
    ImageMissing(PathBuf),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Process supervisor reported an error
    #[error("supervisor error: {0}")]
    Supervisor(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
