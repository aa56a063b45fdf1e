//! Interface naming rules and per-sandbox resource names.
//!
//! The kernel limits interface names to 15 bytes. Veth names are held to 14
//! so a single-character prefix can still be applied by callers; bridge names
//! may use the full 15.

use crate::error::{NetError, ResourceKind, Result};

/// Maximum length of a veth endpoint name.
pub const MAX_VETH_NAME_LEN: usize = 14;

/// Maximum length of a bridge name.
pub const MAX_BRIDGE_NAME_LEN: usize = 15;

/// Maximum length of a sandbox name (leaves room for [`HOST_VETH_PREFIX`]).
pub const MAX_SANDBOX_NAME_LEN: usize = MAX_VETH_NAME_LEN - HOST_VETH_PREFIX.len();

/// Prefix of the host-side veth endpoint of every sandbox.
pub const HOST_VETH_PREFIX: &str = "vh-";

/// Name of the sandbox-side veth endpoint.
///
/// Shared by all sandboxes: it is only ever visible inside the sandbox's own
/// namespace once attached.
pub const CONTAINER_VETH: &str = "host0";

/// Prefix of the network namespace of every sandbox.
pub const NAMESPACE_PREFIX: &str = "corral-";

fn check(
    kind: ResourceKind,
    name: &str,
    max_len: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<()> {
    let invalid = |reason: String| NetError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty".into()));
    }
    if name.chars().count() > max_len {
        return Err(invalid(format!("longer than {max_len} characters")));
    }
    if let Some(c) = name.chars().find(|c| !allowed(*c)) {
        return Err(invalid(format!("character {c:?} is not allowed")));
    }
    Ok(())
}

fn veth_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Validate a veth endpoint name: 1-14 characters of `[A-Za-z0-9._-]`.
pub fn validate_veth_name(name: &str) -> Result<()> {
    check(ResourceKind::Veth, name, MAX_VETH_NAME_LEN, veth_char)
}

/// Validate a bridge name: 1-15 characters of `[A-Za-z0-9_-]`.
pub fn validate_bridge_name(name: &str) -> Result<()> {
    check(ResourceKind::Bridge, name, MAX_BRIDGE_NAME_LEN, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '-')
    })
}

/// Validate a network namespace name.
///
/// Namespaces are files under `/run/netns`, so the length limit is generous
/// but path separators and whitespace are rejected.
pub fn validate_namespace_name(name: &str) -> Result<()> {
    check(ResourceKind::Namespace, name, 64, veth_char)?;
    if name == "." || name == ".." {
        return Err(NetError::InvalidName {
            kind: ResourceKind::Namespace,
            name: name.to_string(),
            reason: "reserved name".into(),
        });
    }
    Ok(())
}

/// Validate a sandbox name so every derived resource name is valid.
///
/// The name doubles as the systemd machine name, which follows hostname
/// rules: `[A-Za-z0-9.-]` with no leading, trailing or doubled `.`.
pub fn validate_sandbox_name(name: &str) -> Result<()> {
    check(ResourceKind::Sandbox, name, MAX_SANDBOX_NAME_LEN, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
    })?;
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return Err(NetError::InvalidName {
            kind: ResourceKind::Sandbox,
            name: name.to_string(),
            reason: "not a valid machine name".into(),
        });
    }
    Ok(())
}

/// Host resource names derived from a sandbox name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxNetNames {
    /// Host-side veth endpoint, member of the bridge.
    pub host_veth: String,
    /// Sandbox-side veth endpoint, moved into `namespace`.
    pub container_veth: String,
    /// The sandbox's network namespace.
    pub namespace: String,
}

impl SandboxNetNames {
    /// Derive the resource names for `sandbox`.
    ///
    /// # Errors
    /// Returns `InvalidName` if the sandbox name is not usable.
    pub fn for_sandbox(sandbox: &str) -> Result<Self> {
        validate_sandbox_name(sandbox)?;
        Ok(Self {
            host_veth: format!("{HOST_VETH_PREFIX}{sandbox}"),
            container_veth: CONTAINER_VETH.to_string(),
            namespace: format!("{NAMESPACE_PREFIX}{sandbox}"),
        })
    }
}
