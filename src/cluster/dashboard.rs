//! Live progress for the primary
//!
//! An indicatif bar on stderr tracks completed requests against the planned
//! total; its message carries the current rate, peak rate and error count.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::stats::ClusterStats;

/// Refresh period of the bar and rate calculation
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} ({percent}%) eta {eta} | {msg}";

/// Ticks [`ClusterStats`] and mirrors it into a progress bar
pub struct Dashboard {
    stats: Arc<Mutex<ClusterStats>>,
    bar: ProgressBar,
    task: Option<JoinHandle<()>>,
}

impl Dashboard {
    /// The bar is hidden in JSON mode and when stderr is not a terminal
    pub fn new(stats: Arc<Mutex<ClusterStats>>, json: bool) -> Self {
        let target = if json || !std::io::stderr().is_terminal() {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr_with_hz(4)
        };
        Self::with_target(stats, target)
    }

    fn with_target(stats: Arc<Mutex<ClusterStats>>, target: ProgressDrawTarget) -> Self {
        let planned = stats.lock().planned_total;
        let bar = ProgressBar::with_draw_target((planned > 0).then_some(planned), target);
        bar.set_style(
            ProgressStyle::with_template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        Self {
            stats,
            bar,
            task: None,
        }
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let stats = self.stats.clone();
        let bar = self.bar.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                refresh(&stats, &bar);
            }
        }));
    }

    /// Stop refreshing and leave the final state on screen
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        refresh(&self.stats, &self.bar);
        self.bar.finish();
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn refresh(stats: &Mutex<ClusterStats>, bar: &ProgressBar) {
    let (completed, message) = {
        let mut stats = stats.lock();
        stats.tick();
        (stats.completed(), status_message(&stats))
    };
    bar.set_position(completed);
    bar.set_message(message);
}

/// Rate, peak and error count shown next to the bar
pub fn status_message(stats: &ClusterStats) -> String {
    format!(
        "rps: {:.0} (peak {:.0}) | errors: {}",
        stats.current_rps, stats.peak_rps, stats.errors
    )
}
