//! # Batch Scheduler
//!
//! Periodic trigger for the batch cycle.
//!
//! ## Features
//!
//! - **Jittered first fire**: the first arming waits a uniformly random delay in
//!   `[T/4, T)` so that several indexer instances started together do not flush
//!   in lockstep
//! - **No overlapping cycles**: the handler is awaited inline by the timer task
//! - **Early trigger**: [`BatchScheduler::reset_timer`] cancels the pending wait
//!   and fires at once, then periodicity resumes
//! - **Cooperative shutdown**: the cycle after [`BatchScheduler::shutdown`] is the
//!   last one; in-flight processing always completes
//!
//! ## States
//!
//! ```text
//! Idle -> WaitingOnTimer -> Processing -> WaitingOnTimer -> ... -> ShuttingDown -> Stopped
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rivven_indexer::common::{BatchScheduler, SchedulerConfig};
//!
//! let scheduler = BatchScheduler::new(SchedulerConfig::builder()
//!     .interval(Duration::from_secs(1))
//!     .build());
//! scheduler.start(handler);
//! // ...
//! scheduler.shutdown();
//! scheduler.wait_to_finish().await?;
//! ```

use crate::common::{IndexerError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period between cycles (default: 1 second)
    pub interval: Duration,
    /// Name used in log lines
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            name: "indexer".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Create a new config builder.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }
}

/// Builder for SchedulerConfig.
#[derive(Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Set the cycle period.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the scheduler name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Build the config.
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

/// Lifecycle state of a [`BatchScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, timer task not started
    Idle,
    /// Timer armed
    WaitingOnTimer,
    /// Handler running
    Processing,
    /// Shutdown requested; the current or next cycle is the last
    ShuttingDown,
    /// Timer task exited
    Stopped,
}

/// Callback invoked once per cycle.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Run one batch cycle. Errors are the handler's to log; the scheduler
    /// keeps going regardless.
    async fn process_batch(&self);
}

/// Delay for the first arming: uniform in `[T/4, T)` at millisecond
/// granularity. Intervals too short to jitter are returned unchanged.
pub fn first_fire_delay<R: Rng>(interval: Duration, rng: &mut R) -> Duration {
    let total_ms = interval.as_millis() as u64;
    let base_ms = total_ms / 4;
    let span_ms = total_ms - base_ms;
    if span_ms == 0 {
        return interval;
    }
    Duration::from_millis(base_ms + rng.gen_range(0..span_ms))
}

#[derive(Debug)]
struct SchedulerShared {
    state: Mutex<SchedulerState>,
    shutdown: AtomicBool,
    reset: Notify,
    cycles: AtomicU64,
    resets: AtomicU64,
}

impl SchedulerShared {
    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    fn request_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        self.reset.notify_one();
    }
}

/// Cloneable early-fire trigger, detached from the scheduler's lifetime.
/// A reset requested while a cycle runs fires right after it.
#[derive(Debug, Clone)]
pub struct TimerReset {
    shared: Arc<SchedulerShared>,
}

impl TimerReset {
    pub fn reset_timer(&self) {
        self.shared.request_reset();
    }
}

/// Timer task driving a [`BatchHandler`].
pub struct BatchScheduler {
    config: SchedulerConfig,
    shared: Arc<SchedulerShared>,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(SchedulerShared {
                state: Mutex::new(SchedulerState::Idle),
                shutdown: AtomicBool::new(false),
                reset: Notify::new(),
                cycles: AtomicU64::new(0),
                resets: AtomicU64::new(0),
            }),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn the timer task. A second call is ignored.
    pub fn start(&self, handler: Arc<dyn BatchHandler>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduler '{}' already started", self.config.name);
            return;
        }

        let shared = self.shared.clone();
        let interval = self.config.interval;
        let name = self.config.name.clone();
        shared.set_state(SchedulerState::WaitingOnTimer);

        let handle = tokio::spawn(async move {
            run_timer(shared, handler, interval, name).await;
        });
        *self.handle.lock() = Some(handle);

        info!(
            "Scheduler '{}' started with interval {:?}",
            self.config.name, self.config.interval
        );
    }

    /// Request shutdown. The cycle in progress (or the next one, if the timer
    /// is waiting) is the last.
    pub fn shutdown(&self) {
        if !self.shutdown_requested() {
            info!("Scheduler '{}' shutting down", self.config.name);
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }

    /// Wait for the timer task to exit. Returns immediately if it never started.
    pub async fn wait_to_finish(&self) -> Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.await.map_err(|e| {
                IndexerError::invalid_state(format!("scheduler task failed: {}", e))
            }),
            None => Ok(()),
        }
    }

    /// Fire now instead of waiting out the remaining delay.
    pub fn reset_timer(&self) {
        self.shared.request_reset();
    }

    /// Handle for triggering early fires from inside a cycle.
    pub fn reset_handle(&self) -> TimerReset {
        TimerReset {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        let state = *self.shared.state.lock();
        match state {
            SchedulerState::Stopped | SchedulerState::Idle => state,
            _ if self.shutdown_requested() => SchedulerState::ShuttingDown,
            _ => state,
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Number of completed cycles.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Number of early triggers requested.
    pub fn resets(&self) -> u64 {
        self.shared.resets.load(Ordering::Relaxed)
    }
}

async fn run_timer(
    shared: Arc<SchedulerShared>,
    handler: Arc<dyn BatchHandler>,
    interval: Duration,
    name: String,
) {
    let mut delay = {
        let mut rng = rand::thread_rng();
        first_fire_delay(interval, &mut rng)
    };
    debug!("Scheduler '{}' first fire in {:?}", name, delay);

    loop {
        shared.set_state(SchedulerState::WaitingOnTimer);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.reset.notified() => {
                debug!("Scheduler '{}' timer reset", name);
            }
        }

        shared.set_state(SchedulerState::Processing);
        handler.process_batch().await;
        shared.cycles.fetch_add(1, Ordering::Relaxed);

        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        delay = interval;
    }

    shared.set_state(SchedulerState::Stopped);
    info!("Scheduler '{}' stopped", name);
}
