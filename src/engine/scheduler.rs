//! Background sync scheduler.
//!
//! Runs one sync cycle shortly after `start()` and then one per interval.
//! A cycle walks the configured protocols one after another, optionally
//! refreshes aggregated metrics, and publishes its outcome to `SyncStats`
//! in a single write. At most one cycle runs at a time; a trigger that
//! arrives mid-cycle is dropped and sees the current stats. A cycle runs
//! on its own task, so dropping the caller does not cut it short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::types::SyncStats;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Weight kept by the previous average when a new cycle lands.
const EMA_KEEP: f64 = 0.8;

/// tokio intervals cannot have a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub startup_delay: Duration,
    /// Synced in this order, one at a time.
    pub protocols: Vec<String>,
    pub enable_aggregated_metrics: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_INTERVAL,
            startup_delay: DEFAULT_STARTUP_DELAY,
            protocols: Vec::new(),
            enable_aggregated_metrics: true,
        }
    }
}

/// Partial update for `SyncScheduler::update_config`. `None` keeps the
/// current value.
#[derive(Debug, Clone, Default)]
pub struct SyncConfigUpdate {
    pub enabled: Option<bool>,
    pub interval: Option<Duration>,
    pub startup_delay: Option<Duration>,
    pub protocols: Option<Vec<String>>,
    pub enable_aggregated_metrics: Option<bool>,
}

// ---------------------------------------------------------------------------
// Sync target
// ---------------------------------------------------------------------------

/// The work a cycle performs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Refresh one protocol; returns how many opportunities were stored.
    async fn sync_protocol(&self, protocol: &str) -> Result<usize>;

    /// Recompute cross-protocol metrics.
    async fn sync_aggregated(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Stats bookkeeping
// ---------------------------------------------------------------------------

/// Moving average of cycle duration. The first sample is taken as-is.
pub fn next_average(previous: f64, duration_ms: f64) -> f64 {
    if previous == 0.0 {
        duration_ms
    } else {
        previous * EMA_KEEP + duration_ms * (1.0 - EMA_KEEP)
    }
}

struct CycleOutcome {
    duration_ms: f64,
    protocols_updated: usize,
    errors: Vec<String>,
    finished_at_ms: i64,
}

/// Fold a finished cycle into the stats.
///
/// Clean cycles count as successful. Cycles that refreshed at least one
/// protocol but hit errors count as successful and partial. Cycles that
/// refreshed nothing and hit errors count as failed.
fn apply_cycle(stats: &mut SyncStats, outcome: CycleOutcome) {
    if outcome.errors.is_empty() {
        stats.successful_syncs += 1;
    } else if outcome.protocols_updated > 0 {
        stats.successful_syncs += 1;
        stats.partial_syncs += 1;
    } else {
        stats.failed_syncs += 1;
    }

    stats.last_sync = outcome.finished_at_ms;
    stats.protocols_updated = outcome.protocols_updated;
    stats.avg_sync_time = next_average(stats.avg_sync_time, outcome.duration_ms);
    stats.errors = outcome.errors;
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Running {
    stop_tx: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

struct Inner {
    target: Arc<dyn SyncTarget>,
    config: Mutex<SyncConfig>,
    stats: RwLock<SyncStats>,
    syncing: AtomicBool,
    task: Mutex<Option<Running>>,
}

/// Releases the syncing flag when the cycle ends, however it ends.
struct SyncingGuard(Arc<Inner>);

impl Drop for SyncingGuard {
    fn drop(&mut self) {
        self.0.syncing.store(false, Ordering::Release);
    }
}

/// Cheap to clone; clones share the same state and timer.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(config: SyncConfig, target: Arc<dyn SyncTarget>) -> Self {
        Self {
            inner: Arc::new(Inner {
                target,
                config: Mutex::new(config),
                stats: RwLock::new(SyncStats::default()),
                syncing: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Begin periodic syncing. No-op when already running or disabled.
    pub fn start(&self) {
        let config = self.inner.config();
        if !config.enabled {
            info!("Background sync disabled, not starting");
            return;
        }

        let mut task = self.inner.lock_task();
        if task.is_some() {
            debug!("Background sync already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            config.interval.max(MIN_INTERVAL),
            config.startup_delay,
            stop_rx,
        ));
        *task = Some(Running {
            stop_tx,
            _handle: handle,
        });

        info!(
            interval_secs = config.interval.as_secs(),
            protocols = config.protocols.len(),
            "Background sync started"
        );
    }

    /// Stop the timer. A cycle already in progress runs to completion.
    pub fn stop(&self) {
        if let Some(running) = self.inner.lock_task().take() {
            let _ = running.stop_tx.send(true);
            info!("Background sync stopped");
        }
    }

    /// Run one cycle now, unless one is already in progress.
    ///
    /// Once started, the cycle completes even if this future is dropped.
    pub async fn perform_sync(&self) -> SyncStats {
        Arc::clone(&self.inner).perform_sync().await
    }

    pub async fn force_sync(&self) -> SyncStats {
        self.perform_sync().await
    }

    /// Stats as of the last completed cycle.
    pub async fn stats(&self) -> SyncStats {
        self.inner.stats.read().await.clone()
    }

    pub fn config(&self) -> SyncConfig {
        self.inner.config()
    }

    /// Merge `update` into the config and react to lifecycle changes.
    pub fn update_config(&self, update: SyncConfigUpdate) {
        let (was_enabled, now_enabled, interval_changed) = {
            let mut config = self.inner.lock_config();
            let was_enabled = config.enabled;
            let old_interval = config.interval;

            if let Some(enabled) = update.enabled {
                config.enabled = enabled;
            }
            if let Some(interval) = update.interval {
                config.interval = interval;
            }
            if let Some(delay) = update.startup_delay {
                config.startup_delay = delay;
            }
            if let Some(protocols) = update.protocols {
                config.protocols = protocols;
            }
            if let Some(flag) = update.enable_aggregated_metrics {
                config.enable_aggregated_metrics = flag;
            }

            (was_enabled, config.enabled, config.interval != old_interval)
        };

        if was_enabled && !now_enabled {
            self.stop();
        } else if !was_enabled && now_enabled {
            self.start();
        } else if interval_changed && self.is_running() {
            self.stop();
            self.start();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_task().is_some()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }
}

impl Inner {
    fn lock_config(&self) -> std::sync::MutexGuard<'_, SyncConfig> {
        self.config.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn config(&self) -> SyncConfig {
        self.lock_config().clone()
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.task.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn perform_sync(self: Arc<Self>) -> SyncStats {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Sync already in progress, skipping");
            return self.stats.read().await.clone();
        }
        let guard = SyncingGuard(Arc::clone(&self));

        let span = info_span!("sync_cycle", cycle_id = %Uuid::new_v4());
        let inner = Arc::clone(&self);
        let cycle = tokio::spawn(
            async move {
                let _guard = guard;
                inner.run_cycle().await
            }
            .instrument(span),
        );

        match cycle.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Sync cycle task failed");
                self.stats.read().await.clone()
            }
        }
    }

    async fn run_cycle(&self) -> SyncStats {
        let config = self.config();
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut protocols_updated = 0;

        info!(protocols = config.protocols.len(), "Sync cycle starting");

        for protocol in &config.protocols {
            match self.target.sync_protocol(protocol).await {
                Ok(count) => {
                    protocols_updated += 1;
                    debug!(protocol = %protocol, count, "Protocol synced");
                }
                Err(e) => {
                    warn!(protocol = %protocol, error = %e, "Protocol sync failed");
                    errors.push(format!("{protocol}: {e}"));
                }
            }
        }

        if config.enable_aggregated_metrics {
            if let Err(e) = self.target.sync_aggregated().await {
                warn!(error = %e, "Aggregated metrics sync failed");
                errors.push(format!("aggregated: {e}"));
            }
        }

        let duration_ms = started.elapsed().as_micros() as f64 / 1000.0;
        let error_count = errors.len();

        let mut stats = self.stats.write().await;
        apply_cycle(
            &mut stats,
            CycleOutcome {
                duration_ms,
                protocols_updated,
                errors,
                finished_at_ms: Utc::now().timestamp_millis(),
            },
        );

        info!(
            duration_ms = duration_ms as u64,
            protocols_updated,
            errors = error_count,
            "Sync cycle complete"
        );

        stats.clone()
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    interval: Duration,
    startup_delay: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    tokio::select! {
        biased;
        _ = stop_rx.changed() => return,
        _ = tokio::time::sleep(startup_delay) => {}
    }
    Arc::clone(&inner).perform_sync().await;

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                Arc::clone(&inner).perform_sync().await;
            }
        }
    }
    debug!("Sync loop exited");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
