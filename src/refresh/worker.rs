//! Periodic refresh worker.
//!
//! Runs one [`RefreshJob`] on a fixed interval until shut down. Used for the
//! inbox list refresh and the open-thread background refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiFuture;
use crate::core::errors::SyncResult;

/// Something that can be refreshed periodically.
pub trait RefreshJob: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Skip this cycle.
    fn is_paused(&self) -> bool {
        false
    }

    /// Run one refresh; `Ok(false)` when there was nothing to do.
    fn refresh(&self) -> ApiFuture<'_, SyncResult<bool>>;
}

/// Configuration for a refresh worker.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between cycles.
    pub interval: Duration,
    /// Whether the worker runs at all.
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            enabled: true,
        }
    }
}

/// Counters from a worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Cycles that ran a refresh.
    pub refreshed: u64,
    /// Cycles skipped because the job was paused or idle.
    pub skipped: u64,
    /// Cycles whose refresh failed.
    pub failed: u64,
}

/// Background worker driving one job.
pub struct RefreshWorker<J: ?Sized> {
    job: Arc<J>,
    config: RefreshConfig,
    shutdown: Arc<Notify>,
}

impl<J: RefreshJob + ?Sized> RefreshWorker<J> {
    /// Create a worker for `job`.
    #[must_use]
    pub fn new(job: Arc<J>, config: RefreshConfig) -> Self {
        Self {
            job,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a shutdown notifier to stop the worker.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(self) -> RefreshHandle {
        let shutdown = self.shutdown_notifier();
        let task = tokio::spawn(async move { self.run().await });
        RefreshHandle { shutdown, task }
    }

    /// Run the refresh loop until shutdown is signaled.
    pub async fn run(&self) -> RefreshStats {
        let mut stats = RefreshStats::default();
        let name = self.job.name();
        if !self.config.enabled {
            info!(job = name, "Refresh worker is disabled");
            return stats;
        }

        let interval = self.config.interval;
        info!(job = name, ?interval, "Starting refresh worker");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    self.run_cycle(&mut stats).await;
                }
                () = self.shutdown.notified() => {
                    info!(job = name, "Refresh worker shutting down");
                    break;
                }
            }
        }
        stats
    }

    /// Run a single cycle.
    pub async fn run_cycle(&self, stats: &mut RefreshStats) {
        let name = self.job.name();
        if self.job.is_paused() {
            debug!(job = name, "Refresh paused");
            stats.skipped += 1;
            return;
        }
        match self.job.refresh().await {
            Ok(true) => {
                debug!(job = name, "Refresh completed");
                stats.refreshed += 1;
            }
            Ok(false) => stats.skipped += 1,
            Err(err) => {
                warn!(job = name, "Refresh failed: {err}");
                stats.failed += 1;
            }
        }
    }
}

/// Handle to a spawned worker.
pub struct RefreshHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<RefreshStats>,
}

impl RefreshHandle {
    /// Signal shutdown and wait for the worker to finish.
    pub async fn stop(self) -> RefreshStats {
        self.shutdown.notify_one();
        match self.task.await {
            Ok(stats) => stats,
            Err(err) => {
                warn!("Refresh worker task failed: {err}");
                RefreshStats::default()
            }
        }
    }

    /// Stop without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Builder for refresh configuration.
#[derive(Debug, Clone, Default)]
pub struct RefreshConfigBuilder {
    interval: Option<Duration>,
    enabled: Option<bool>,
}

impl RefreshConfigBuilder {
    /// Create a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refresh interval.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Enable or disable the worker.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> RefreshConfig {
        let default = RefreshConfig::default();
        RefreshConfig {
            interval: self.interval.unwrap_or(default.interval),
            enabled: self.enabled.unwrap_or(default.enabled),
        }
    }
}
