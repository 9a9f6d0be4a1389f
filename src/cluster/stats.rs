//! Request counters
//!
//! Workers count locally and periodically ship non-zero deltas to the
//! primary. The primary owns the only running totals in [`ClusterStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ipc::{IpcSender, WorkerMessage};
use crate::error::Result;

/// Default delta flush period
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Owns a worker's counters and the periodic flush task
///
/// Lifecycle: [`start`](Self::start) spawns the ticker,
/// [`update`](Self::update) records outcomes, [`flush`](Self::flush) ships
/// and zeroes deltas, [`reset`](Self::reset) takes them without sending and
/// [`stop`](Self::stop) halts the ticker after a final flush.
pub struct StatsReporter {
    success: AtomicU64,
    errors: AtomicU64,
    sender: IpcSender,
    interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl StatsReporter {
    pub fn new(sender: IpcSender, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            success: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            sender,
            interval,
            ticker: Mutex::new(None),
        })
    }

    /// Spawn the periodic flush; calling it twice keeps the first ticker
    ///
    /// The ticker only holds a weak reference and ends with the reporter.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.ticker.lock();
        if slot.is_some() {
            return;
        }

        let reporter: Weak<Self> = Arc::downgrade(self);
        let period = self.interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(reporter) = reporter.upgrade() else {
                    break;
                };
                if let Err(e) = reporter.flush().await {
                    debug!(error = %e, "Stats flush failed, stopping reporter");
                    break;
                }
            }
        }));
    }

    /// Record one finished request
    pub fn update(&self, success: bool) {
        let counter = if success { &self.success } else { &self.errors };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the unsent (success, error) deltas and zero them
    pub fn reset(&self) -> (u64, u64) {
        (
            self.success.swap(0, Ordering::Relaxed),
            self.errors.swap(0, Ordering::Relaxed),
        )
    }

    /// Send non-zero deltas now
    pub async fn flush(&self) -> Result<()> {
        let (success, errors) = self.reset();
        if success > 0 {
            self.sender
                .send(WorkerMessage::RpsSuccess { count: success })
                .await?;
        }
        if errors > 0 {
            self.sender
                .send(WorkerMessage::RpsError { count: errors })
                .await?;
        }
        Ok(())
    }

    /// Stop the ticker and ship whatever is left
    pub async fn stop(&self) -> Result<()> {
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.abort();
            let _ = ticker.await;
        }
        self.flush().await
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

/// Primary-side running totals
#[derive(Debug, Clone)]
pub struct ClusterStats {
    /// Successful requests across all workers
    pub total: u64,
    /// Failed requests across all workers
    pub errors: u64,
    /// Highest requests per second seen on a tick
    pub peak_rps: f64,
    /// Requests per second over the last tick
    pub current_rps: f64,
    /// Non-empty wordlist lines
    pub planned_total: u64,
    pub start_time: Instant,
    last_tick: Instant,
    last_completed: u64,
}

impl ClusterStats {
    pub fn new(planned_total: u64) -> Self {
        let now = Instant::now();
        Self {
            total: 0,
            errors: 0,
            peak_rps: 0.0,
            current_rps: 0.0,
            planned_total,
            start_time: now,
            last_tick: now,
            last_completed: 0,
        }
    }

    /// Apply a stat delta; output messages are ignored
    pub fn apply(&mut self, message: &WorkerMessage) {
        match message {
            WorkerMessage::RpsSuccess { count } => self.total += count,
            WorkerMessage::RpsError { count } => self.errors += count,
            WorkerMessage::OutputResult { .. } => {}
        }
    }

    /// Requests finished, successful or not
    pub fn completed(&self) -> u64 {
        self.total + self.errors
    }

    /// Recompute the rate since the previous tick
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_tick).as_secs_f64();
        if elapsed <= 0.0 {
            return self.current_rps;
        }

        let completed = self.completed();
        self.current_rps = completed.saturating_sub(self.last_completed) as f64 / elapsed;
        if self.current_rps > self.peak_rps {
            self.peak_rps = self.current_rps;
        }
        self.last_completed = completed;
        self.last_tick = now;
        self.current_rps
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
