//! Periodic task runner for hardware refresh loops
//!
//! Each [`PeriodicTask`] gets its own tokio task that sleeps for the task's
//! period, runs it, and repeats until the scheduler is cancelled or the task
//! reports it is finished. Repeated failures stretch the period through
//! [`Backoff`].

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Work the scheduler runs at a fixed rate
pub trait PeriodicTask: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> String;

    /// Time between runs; read before every sleep so changes apply live
    fn period(&self) -> Duration;

    fn run(&self) -> dmxbus_core::Result<()>;

    /// Return true once the task's device is gone
    fn is_finished(&self) -> bool {
        false
    }
}

/// Failure handling limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Consecutive failures before the period starts doubling
    pub max_failures: u32,
    /// Upper bound of a stretched period
    pub max_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            max_period: Duration::from_secs(5),
        }
    }
}

/// Consecutive-failure counter that stretches a task's period
#[derive(Debug, Clone)]
pub struct Backoff {
    config: SchedulerConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// True while the period is stretched
    pub fn is_backing_off(&self) -> bool {
        self.failures >= self.config.max_failures
    }

    /// Effective period for a task whose nominal period is `base`
    pub fn period(&self, base: Duration) -> Duration {
        if !self.is_backing_off() {
            return base;
        }
        let shift = (self.failures - self.config.max_failures + 1).min(16);
        let stretched = base.saturating_mul(1u32 << shift);
        stretched.min(self.config.max_period.max(base))
    }
}

/// Owner of all running periodic tasks
pub struct Scheduler {
    config: SchedulerConfig,
    token: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Token cancelled by [`shutdown`](Self::shutdown)
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start running `task`. Must be called from within a tokio runtime.
    pub fn spawn(&mut self, task: Arc<dyn PeriodicTask>) {
        let name = task.name();
        let token = self.token.child_token();
        let config = self.config;
        let handle = tokio::spawn(run_task(task, config, token));
        tracing::info!("Periodic task {} scheduled", name);
        self.handles.push((name, handle));
    }

    /// Number of tasks that have not stopped yet
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Cancel every task and wait for all of them to stop
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!("Periodic task {} ended abnormally: {}", name, e);
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn run_task(task: Arc<dyn PeriodicTask>, config: SchedulerConfig, token: CancellationToken) {
    let name = task.name();
    let span = tracing::debug_span!("task", name = %name);
    let mut backoff = Backoff::new(config);

    loop {
        let period = backoff.period(task.period());
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        if task.is_finished() {
            tracing::debug!("Periodic task {} finished", name);
            break;
        }

        match span.in_scope(|| task.run()) {
            Ok(()) => {
                if backoff.is_backing_off() {
                    tracing::info!("Periodic task {} recovered after {} failures", name, backoff.failures());
                }
                backoff.record_success();
            }
            Err(e) => {
                backoff.record_failure();
                if backoff.failures() == config.max_failures {
                    tracing::warn!(
                        "Periodic task {} failed {} times in a row, backing off: {}",
                        name,
                        backoff.failures(),
                        e
                    );
                } else {
                    tracing::debug!("Periodic task {} failed: {}", name, e);
                }
            }
        }
    }
}
