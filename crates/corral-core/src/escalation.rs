//! Try, wait with a timeout, escalate.
//!
//! An [`Escalation`] is an ordered list of stages. Each stage fires an action
//! and then polls a check until it reports settled or the stage timeout
//! runs out, at which point the next, more forceful stage fires.
//!
//! All waiting uses tokio's clock, so paused-time tests advance it
//! deterministically.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// One escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage<S> {
    pub signal: S,
    pub timeout: Duration,
}

/// How an escalation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<S> {
    /// The check passed during `stage`.
    Settled { stage: S, elapsed: Duration },
    /// Every stage timed out.
    Exhausted { elapsed: Duration },
}

impl<S> Outcome<S> {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Settled { elapsed, .. } | Self::Exhausted { elapsed } => *elapsed,
        }
    }
}

/// Ordered stages sharing one poll interval.
#[derive(Debug, Clone)]
pub struct Escalation<S> {
    stages: Vec<Stage<S>>,
    poll_interval: Duration,
}

impl<S: Copy + Debug> Escalation<S> {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            stages: Vec::new(),
            poll_interval,
        }
    }

    /// Append a stage.
    pub fn stage(mut self, signal: S, timeout: Duration) -> Self {
        self.stages.push(Stage { signal, timeout });
        self
    }

    pub fn stages(&self) -> &[Stage<S>] {
        &self.stages
    }

    /// Run stages in order until `settled` returns true.
    ///
    /// `action` is called once per stage that is reached. `settled` is
    /// checked right after the action and then every poll interval.
    pub async fn run<A, AF, C, CF>(&self, mut action: A, mut settled: C) -> Outcome<S>
    where
        A: FnMut(S) -> AF,
        AF: Future<Output = ()>,
        C: FnMut() -> CF,
        CF: Future<Output = bool>,
    {
        let start = Instant::now();
        for stage in &self.stages {
            tracing::debug!(signal = ?stage.signal, timeout_ms = stage.timeout.as_millis() as u64, "Escalation stage");
            action(stage.signal).await;
            if wait_until(stage.timeout, self.poll_interval, &mut settled).await {
                return Outcome::Settled {
                    stage: stage.signal,
                    elapsed: start.elapsed(),
                };
            }
        }
        Outcome::Exhausted {
            elapsed: start.elapsed(),
        }
    }
}

/// Poll `check` every `interval` until it passes or `timeout` has elapsed.
///
/// The check runs once more at the deadline. Returns whether it passed.
pub async fn wait_until<C, CF>(timeout: Duration, interval: Duration, mut check: C) -> bool
where
    C: FnMut() -> CF,
    CF: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
