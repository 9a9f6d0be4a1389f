//! Multi-process worker pool
//!
//! The primary process spawns one worker process per wordlist shard and
//! collects their stat deltas and result lines over loopback IPC. Workers
//! share nothing with each other.

pub mod cores;
pub mod dashboard;
pub mod ipc;
pub mod output;
pub mod primary;
pub mod stats;
pub mod worker;

pub use cores::{available_cores, CoreSpec};
pub use worker::WorkerIdentity;

/// Worker index, set by the primary
pub const ENV_WORKER_ID: &str = "FUZZ404_WORKER_ID";
/// Total number of workers, set by the primary
pub const ENV_WORKER_COUNT: &str = "FUZZ404_WORKER_COUNT";
/// Primary's IPC listener, set by the primary
pub const ENV_IPC_ADDR: &str = "FUZZ404_IPC_ADDR";
/// Print full diagnostics for unexpected errors
pub const ENV_DEBUG: &str = "FUZZ404_DEBUG";

/// Interrupt and termination signals
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Install the handlers; from here on the signals no longer kill the process
    pub fn register() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => "SIGINT",
                _ = self.terminate.recv() => "SIGTERM",
            }
        }

        #[cfg(not(unix))]
        {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "Ctrl+C",
                Err(_) => std::future::pending().await,
            }
        }
    }
}
