//! Sandbox lifecycle manager.
//!
//! ```text
//! STOPPED ──start──▶ STARTING ──▶ RUNNING ──stop──▶ STOPPING ──▶ STOPPED
//!                       │                              │
//!                       └──────────▶ FAILED ◀──────────┘
//! ```
//!
//! Both exits into `FAILED` run the full cleanup first, so a failed sandbox
//! holds no namespace or veth pair. Its unit is released, but one that
//! survived every stop signal may still be active; `start` relaunches it.

use crate::config::ManagerConfig;
use crate::error::{CoreError, Result};
use crate::escalation::Outcome;
use crate::image::ImageStore;
use crate::sandbox::{SandboxName, SandboxRecord, SandboxState};
use crate::supervisor::{StopSignal, Supervisor, UnitSpec};
use chrono::Utc;
use corral_net::{AttachmentOrchestrator, NetHost};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Starts and stops supervised sandboxes together with their network.
///
/// # Thread Safety
///
/// The state tracker sits behind an async RwLock, so the manager can be
/// shared across tasks. Operations on the same sandbox name must still be
/// serialized by the caller.
pub struct LifecycleManager {
    net: AttachmentOrchestrator,
    supervisor: Arc<dyn Supervisor>,
    images: Arc<dyn ImageStore>,
    config: ManagerConfig,
    sandboxes: Arc<RwLock<HashMap<SandboxName, SandboxRecord>>>,
}

impl LifecycleManager {
    /// Create a lifecycle manager.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the configuration is invalid.
    pub fn new(
        host: Arc<dyn NetHost>,
        supervisor: Arc<dyn Supervisor>,
        images: Arc<dyn ImageStore>,
        config: ManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(bridge = %config.bridge, "Creating lifecycle manager");
        Ok(Self {
            net: AttachmentOrchestrator::new(host),
            supervisor,
            images,
            config,
            sandboxes: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The network orchestrator sandboxes are wired through.
    pub fn network(&self) -> &AttachmentOrchestrator {
        &self.net
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start a sandbox.
    ///
    /// A sandbox whose unit is active and whose network is wired is left
    /// alone. Otherwise the image is resolved, the network is wired and the
    /// unit is launched bound to the sandbox namespace. An active unit with
    /// no network is released and launched again. Any failure cleans up and
    /// leaves the sandbox `FAILED`.
    pub async fn start(&self, name: &str) -> Result<()> {
        let name = SandboxName::new(name)?;
        if self.supervisor.is_active(&name.unit()).await {
            if self.is_wired(&name).await {
                tracing::info!(sandbox = %name, "Sandbox already running");
                self.record(&name, SandboxState::Running).await;
                return Ok(());
            }
            tracing::warn!(sandbox = %name, "Sandbox unit active without network, relaunching");
        }

        let start = Instant::now();
        tracing::info!(sandbox = %name, bridge = %self.config.bridge, "Starting sandbox");
        self.record(&name, SandboxState::Starting).await;

        match self.bring_up(&name).await {
            Ok(()) => {
                self.record(&name, SandboxState::Running).await;
                tracing::info!(
                    sandbox = %name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Sandbox running"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(sandbox = %name, error = %e, "Sandbox start failed, cleaning up");
                self.cleanup_sandbox(&name).await;
                self.record(&name, SandboxState::Failed).await;
                Err(e)
            }
        }
    }

    async fn bring_up(&self, name: &SandboxName) -> Result<()> {
        self.reclaim_stale(name).await;

        let root = self.images.ensure(name).await?;
        self.net
            .bridges()
            .create(&self.config.bridge, self.config.bridge_addr.as_deref())
            .await?;
        self.net.attach(&self.config.bridge, name.as_str()).await?;

        let spec = UnitSpec::new(name, root);
        self.supervisor.launch(&spec).await.map_err(|e| match e {
            CoreError::LaunchFailed(_) => e,
            other => CoreError::LaunchFailed(other.to_string()),
        })
    }

    /// Whether the sandbox namespace and host-side veth both exist.
    async fn is_wired(&self, name: &SandboxName) -> bool {
        let net = name.net_names();
        self.net.namespaces().exists(&net.namespace).await
            && self.net.veths().exists(&net.host_veth).await
    }

    /// Remove leftovers of an earlier run that died without cleanup.
    async fn reclaim_stale(&self, name: &SandboxName) {
        let net = name.net_names();
        let stale = self.net.veths().exists(&net.host_veth).await
            || self.net.namespaces().exists(&net.namespace).await;
        if stale {
            tracing::warn!(sandbox = %name, "Reclaiming stale sandbox network");
            self.net.cleanup(name.as_str(), &self.config.bridge).await;
        }
        if let Err(e) = self.supervisor.release(&name.unit()).await {
            tracing::debug!(sandbox = %name, error = %e, "No stale unit to release");
        }
    }

    // ========================================================================
    // Stop
    // ========================================================================

    /// Stop a sandbox.
    ///
    /// Escalates graceful stop, SIGTERM and SIGKILL, moving on only when a
    /// stage times out. Cleanup runs exactly once whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StopFailed`] if the unit is still active after
    /// cleanup.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let name = SandboxName::new(name)?;
        let unit = name.unit();

        if !self.supervisor.is_active(&unit).await {
            tracing::info!(sandbox = %name, "Sandbox not running, cleaning up");
            self.cleanup_sandbox(&name).await;
            self.record(&name, SandboxState::Stopped).await;
            return Ok(());
        }

        tracing::info!(sandbox = %name, "Stopping sandbox");
        self.record(&name, SandboxState::Stopping).await;

        let supervisor = &self.supervisor;
        let unit_ref = unit.as_str();
        let outcome = self
            .config
            .stop
            .escalation()
            .run(
                move |signal| async move {
                    tracing::debug!(unit = %unit_ref, %signal, "Sending stop signal");
                    if let Err(e) = supervisor.signal(unit_ref, signal).await {
                        tracing::warn!(unit = %unit_ref, %signal, error = %e, "Stop signal failed");
                    }
                },
                move || async move { !supervisor.is_active(unit_ref).await },
            )
            .await;

        match outcome {
            Outcome::Settled { stage, elapsed } => {
                tracing::debug!(
                    sandbox = %name,
                    %stage,
                    forced = stage == StopSignal::Kill,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Sandbox exited"
                );
            }
            Outcome::Exhausted { elapsed } => {
                tracing::warn!(
                    sandbox = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Sandbox survived every stop stage"
                );
            }
        }

        self.cleanup_sandbox(&name).await;

        if self.supervisor.is_active(&unit).await {
            tracing::error!(sandbox = %name, %unit, "Sandbox still active after cleanup");
            self.record(&name, SandboxState::Failed).await;
            return Err(CoreError::StopFailed(format!(
                "{unit} still active after {:?}",
                outcome.elapsed()
            )));
        }

        self.record(&name, SandboxState::Stopped).await;
        tracing::info!(
            sandbox = %name,
            elapsed_ms = outcome.elapsed().as_millis() as u64,
            "Sandbox stopped"
        );
        Ok(())
    }

    // ========================================================================
    // Cleanup and queries
    // ========================================================================

    /// Reclaim the network and supervising unit of a sandbox.
    ///
    /// Never fails: problems are logged as warnings. Returns whether the
    /// sandbox network is fully reclaimed.
    pub async fn cleanup(&self, name: &str) -> bool {
        match SandboxName::new(name) {
            Ok(name) => self.cleanup_sandbox(&name).await,
            Err(e) => {
                tracing::warn!(sandbox = %name, error = %e, "Skipping cleanup");
                false
            }
        }
    }

    async fn cleanup_sandbox(&self, name: &SandboxName) -> bool {
        let clean = self.net.cleanup(name.as_str(), &self.config.bridge).await;
        if let Err(e) = self.supervisor.release(&name.unit()).await {
            tracing::warn!(sandbox = %name, error = %e, "Unit release during cleanup failed");
        }
        clean
    }

    /// Current state of a sandbox, reconciled with the supervisor.
    ///
    /// An active unit with its namespace and veth in place is `RUNNING`.
    /// An active unit without them, or one whose stop already failed, is
    /// `FAILED`. A sandbox tracked as `RUNNING` whose unit has gone away is
    /// reported `STOPPED`.
    pub async fn state(&self, name: &str) -> Result<SandboxState> {
        let name = SandboxName::new(name)?;
        let tracked = self
            .sandboxes
            .read()
            .await
            .get(&name)
            .map(|r| r.state);
        let active = self.supervisor.is_active(&name.unit()).await;
        let wired = active && self.is_wired(&name).await;

        let state = match (tracked, active, wired) {
            (Some(SandboxState::Failed), true, _) | (_, true, false) => SandboxState::Failed,
            (_, true, true) => SandboxState::Running,
            (Some(SandboxState::Running), false, _) | (None, false, _) => SandboxState::Stopped,
            (Some(state), false, _) => state,
        };
        if tracked != Some(state) && tracked.is_some() {
            tracing::debug!(sandbox = %name, ?tracked, %state, "Reconciled sandbox state");
            self.record(&name, state).await;
        }
        Ok(state)
    }

    /// Tracked sandboxes, sorted by name.
    pub async fn list(&self) -> Vec<SandboxRecord> {
        let mut records: Vec<_> = self.sandboxes.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    async fn record(&self, name: &SandboxName, state: SandboxState) {
        let mut sandboxes = self.sandboxes.write().await;
        let record = sandboxes
            .entry(name.clone())
            .or_insert_with(|| SandboxRecord::new(name.clone()));
        match state {
            SandboxState::Running if record.state != SandboxState::Running => {
                record.started_at = Some(Utc::now());
            }
            SandboxState::Stopped | SandboxState::Failed => record.started_at = None,
            _ => {}
        }
        record.state = state;
    }
}
