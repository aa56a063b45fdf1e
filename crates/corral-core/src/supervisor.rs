//! Process supervision for sandboxes.
//!
//! A sandbox runs as `systemd-nspawn --boot` inside a transient systemd unit.
//! Its exit is observed through the unit's active state, never by waiting
//! on a child process.

use crate::error::{CoreError, Result};
use crate::sandbox::SandboxName;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Signals sent to a supervised unit, in increasing order of force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StopSignal {
    /// Ask the unit to stop and let the sandbox init shut down cleanly.
    Graceful,
    /// SIGTERM to every process in the unit.
    Terminate,
    /// SIGKILL to every process in the unit.
    Kill,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => write!(f, "graceful"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// What to launch under a supervising unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// Unit name, e.g. `corral-web.service`.
    pub unit: String,
    /// Machine name registered for the container.
    pub machine: String,
    /// Root filesystem of the sandbox.
    pub directory: PathBuf,
    /// Bind mount of the pre-wired network namespace.
    pub netns_path: PathBuf,
}

impl UnitSpec {
    pub fn new(name: &SandboxName, directory: impl Into<PathBuf>) -> Self {
        Self {
            unit: name.unit(),
            machine: name.to_string(),
            directory: directory.into(),
            netns_path: Path::new("/run/netns").join(name.net_names().namespace),
        }
    }
}

/// Launches, signals and reaps supervised sandbox units.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Start the unit. Fails with [`CoreError::LaunchFailed`].
    async fn launch(&self, spec: &UnitSpec) -> Result<()>;

    /// Whether the unit is currently active. Lookup errors count as inactive.
    async fn is_active(&self, unit: &str) -> bool;

    /// Deliver one stop stage to the unit without waiting for it to exit.
    async fn signal(&self, unit: &str, signal: StopSignal) -> Result<()>;

    /// Stop the unit if it is still loaded and clear its failed state so
    /// the name can be reused.
    async fn release(&self, unit: &str) -> Result<()>;
}

/// [`Supervisor`] backed by `systemd-run` and `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdSupervisor {
    systemd_run: PathBuf,
    systemctl: PathBuf,
    nspawn: PathBuf,
}

impl Default for SystemdSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemdSupervisor {
    pub fn new() -> Self {
        Self {
            systemd_run: PathBuf::from("systemd-run"),
            systemctl: PathBuf::from("systemctl"),
            nspawn: PathBuf::from("/usr/bin/systemd-nspawn"),
        }
    }

    /// Override the `systemd-nspawn` binary.
    pub fn with_nspawn(mut self, path: impl Into<PathBuf>) -> Self {
        self.nspawn = path.into();
        self
    }

    fn launch_args(&self, spec: &UnitSpec) -> Vec<String> {
        vec![
            format!("--unit={}", spec.unit),
            "--property=Type=notify".to_string(),
            "--property=KillMode=mixed".to_string(),
            "--property=Delegate=yes".to_string(),
            format!("--description=corral sandbox {}", spec.machine),
            self.nspawn.display().to_string(),
            "--quiet".to_string(),
            "--keep-unit".to_string(),
            "--boot".to_string(),
            format!("--machine={}", spec.machine),
            format!("--directory={}", spec.directory.display()),
            format!("--network-namespace-path={}", spec.netns_path.display()),
        ]
    }

    async fn systemctl(&self, args: &[&str]) -> std::result::Result<(), String> {
        tracing::trace!(?args, "Running systemctl");
        let output = Command::new(&self.systemctl)
            .args(args)
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

#[async_trait]
impl Supervisor for SystemdSupervisor {
    async fn launch(&self, spec: &UnitSpec) -> Result<()> {
        let args = self.launch_args(spec);
        tracing::debug!(unit = %spec.unit, ?args, "Launching unit");

        let output = Command::new(&self.systemd_run)
            .args(&args)
            .output()
            .await
            .map_err(|e| CoreError::LaunchFailed(format!("{}: {e}", self.systemd_run.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CoreError::LaunchFailed(format!("{}: {stderr}", spec.unit)));
        }
        Ok(())
    }

    async fn is_active(&self, unit: &str) -> bool {
        self.systemctl(&["is-active", "--quiet", unit]).await.is_ok()
    }

    async fn signal(&self, unit: &str, signal: StopSignal) -> Result<()> {
        let result = match signal {
            StopSignal::Graceful => self.systemctl(&["stop", "--no-block", unit]).await,
            StopSignal::Terminate => {
                self.systemctl(&["kill", "--signal=SIGTERM", unit]).await
            }
            StopSignal::Kill => self.systemctl(&["kill", "--signal=SIGKILL", unit]).await,
        };
        result.map_err(|stderr| CoreError::Supervisor(format!("{signal} {unit}: {stderr}")))
    }

    async fn release(&self, unit: &str) -> Result<()> {
        if let Err(stderr) = self.systemctl(&["stop", unit]).await {
            if !stderr.contains("not loaded") {
                return Err(CoreError::Supervisor(format!("stop {unit}: {stderr}")));
            }
        }
        // Only failed units have state to reset.
        if let Err(stderr) = self.systemctl(&["reset-failed", unit]).await {
            tracing::trace!(%unit, %stderr, "reset-failed skipped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_spec_from_name() {
        let name = SandboxName::new("web").unwrap();
        let spec = UnitSpec::new(&name, "/var/lib/corral/images/web");
        assert_eq!(spec.unit, "corral-web.service");
        assert_eq!(spec.machine, "web");
        assert_eq!(spec.netns_path, PathBuf::from("/run/netns/corral-web"));
    }

    #[test]
    fn test_launch_args_bind_namespace() {
        let name = SandboxName::new("web").unwrap();
        let spec = UnitSpec::new(&name, "/images/web");
        let args = SystemdSupervisor::new().launch_args(&spec);

        assert_eq!(args[0], "--unit=corral-web.service");
        let nspawn = args
            .iter()
            .position(|a| a == "/usr/bin/systemd-nspawn")
            .unwrap();
        let tail = &args[nspawn + 1..];
        assert!(tail.contains(&"--boot".to_string()));
        assert!(tail.contains(&"--machine=web".to_string()));
        assert!(tail.contains(&"--directory=/images/web".to_string()));
        assert!(tail.contains(&"--network-namespace-path=/run/netns/corral-web".to_string()));
    }

    #[test]
    fn test_stop_signal_order() {
        assert!(StopSignal::Graceful < StopSignal::Terminate);
        assert!(StopSignal::Terminate < StopSignal::Kill);
        assert_eq!(StopSignal::Kill.to_string(), "SIGKILL");
    }

    #[tokio::test]
    #[ignore = "requires root and systemd"]
    async fn test_systemd_unknown_unit_is_inactive() {
        let sup = SystemdSupervisor::new();
        assert!(!sup.is_active("corral-nonexistent.service").await);
        sup.release("corral-nonexistent.service").await.unwrap();
    }
}
