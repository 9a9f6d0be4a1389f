//! Worker-pool orchestrator
//!
//! Validates the run, spawns one worker process per shard, aggregates their
//! messages and owns the process lifecycle:
//!
//! - all workers exited: finalize, exit 0 unless one of them failed
//! - first SIGINT/SIGTERM: SIGTERM to every live worker, wait the grace
//!   period, force-kill what is left, finalize, exit 0
//! - further signals during shutdown are ignored

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::dashboard::Dashboard;
use super::ipc;
use super::output::{route_messages, OutputFile, ResultSink, StdoutSink};
use super::stats::ClusterStats;
use super::{available_cores, ShutdownSignal, ENV_IPC_ADDR, ENV_WORKER_COUNT, ENV_WORKER_ID};
use crate::app::RunOptions;
use crate::error::{FuzzError, Result};
use crate::fuzzer::{count_words, validate_wordlist, FuzzTarget};
use crate::http::format_duration;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every worker finished its shard
    Completed,
    /// At least one worker exited with a failure
    Failed,
    /// Stopped by a signal
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed | RunOutcome::Interrupted => 0,
            RunOutcome::Failed => 1,
        }
    }
}

/// A spawned worker as seen by the primary
struct WorkerHandle {
    id: usize,
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    running: bool,
}

impl WorkerHandle {
    /// Ask the worker to stop, falling back to a kill
    fn terminate(&mut self) {
        if !self.running {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // SAFETY: kill(2) takes plain integers and touches no memory of ours
            if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
                return;
            }
            warn!(worker = self.id, pid, "Failed to signal worker");
        }
        self.force_kill();
    }

    /// Kill the worker outright; its waiter task owns the child
    fn force_kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Run the primary to completion
pub async fn run(options: RunOptions) -> Result<RunOutcome> {
    // Preconditions, all fatal, before anything is spawned
    FuzzTarget::prepare(
        &options.url,
        &options.method,
        &options.default_headers,
        &options.headers,
        options.data.as_deref(),
        &options.keyword,
    )?;
    validate_wordlist(&options.wordlist).await?;
    let planned = count_words(&options.wordlist).await?;
    if planned == 0 {
        return Err(FuzzError::validation(format!(
            "Wordlist is empty: {}",
            options.wordlist.display()
        )));
    }

    let sink: Arc<dyn ResultSink> = match &options.output {
        Some(path) => {
            let file = OutputFile::create(path).await?;
            info!(path = %file.path().display(), "Writing results to file");
            Arc::new(file)
        }
        None => Arc::new(StdoutSink::new()),
    };

    let mut signals = ShutdownSignal::register()?;
    let cores = options.cores.resolve(available_cores());
    info!(
        words = planned,
        workers = cores,
        "Wordlist: {} words | Starting {} workers",
        planned,
        cores
    );

    let (listener, addr) = ipc::bind().await?;
    let (msg_tx, msg_rx) = mpsc::channel(options.output_buffer.max(1));
    let (stop_accepting, stop_rx) = oneshot::channel();
    let acceptor = ipc::spawn_acceptor(listener, cores, msg_tx, stop_rx);

    let stats = Arc::new(Mutex::new(ClusterStats::new(planned as u64)));
    let router = tokio::spawn(route_messages(msg_rx, stats.clone(), sink));
    let mut dashboard = Dashboard::new(stats.clone(), options.json);
    dashboard.start();

    let (exit_tx, mut exit_rx) = mpsc::channel(cores.max(1));
    let mut workers = Vec::with_capacity(cores);
    let mut spawn_error = None;
    for id in 0..cores {
        match spawn_worker(id, cores, addr, exit_tx.clone()) {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                spawn_error = Some(e);
                break;
            }
        }
    }
    drop(exit_tx);

    let mut outcome = RunOutcome::Completed;
    if let Some(e) = &spawn_error {
        error!(error = %e, "Failed to spawn worker");
        outcome = RunOutcome::Failed;
        for worker in &mut workers {
            worker.force_kill();
        }
    }

    let grace = tokio::time::sleep(options.shutdown_grace);
    tokio::pin!(grace);
    let mut shutting_down = false;
    let mut forced = false;
    let mut remaining = workers.len();

    while remaining > 0 {
        tokio::select! {
            exited = exit_rx.recv() => {
                let Some((id, status)) = exited else { break };
                remaining -= 1;
                if let Some(worker) = workers.iter_mut().find(|w| w.id == id) {
                    worker.running = false;
                    worker.kill = None;
                }
                if !shutting_down && !exited_cleanly(&status) {
                    error!(worker = id, status = %describe(&status), "Worker failed");
                    outcome = RunOutcome::Failed;
                }
            }
            signal = signals.recv(), if !shutting_down => {
                info!(signal, "Shutting down workers");
                shutting_down = true;
                outcome = RunOutcome::Interrupted;
                for worker in &mut workers {
                    worker.terminate();
                }
                grace
                    .as_mut()
                    .reset(tokio::time::Instant::now() + options.shutdown_grace);
            }
            _ = &mut grace, if shutting_down && !forced => {
                forced = true;
                for worker in &mut workers {
                    if worker.running {
                        warn!(worker = worker.id, "Worker did not stop in time, killing");
                        worker.force_kill();
                    }
                }
            }
        }
    }

    // Every worker is gone: collect what is still in flight, then flush
    let _ = stop_accepting.send(());
    if acceptor.await.is_err() {
        warn!("IPC acceptor task failed");
    }
    dashboard.stop().await;
    let routed = router
        .await
        .map_err(|e| FuzzError::unknown("Output router task failed", e))??;

    let stats = stats.lock().clone();
    info!(
        successes = stats.total,
        errors = stats.errors,
        peak_rps = stats.peak_rps.round() as u64,
        results = routed,
        elapsed = %format_duration(stats.elapsed().as_secs_f64() * 1000.0),
        "Fuzzing finished"
    );

    if let Some(e) = spawn_error {
        return Err(e);
    }
    Ok(outcome)
}

fn spawn_worker(
    id: usize,
    count: usize,
    addr: std::net::SocketAddr,
    exits: mpsc::Sender<(usize, std::io::Result<ExitStatus>)>,
) -> Result<WorkerHandle> {
    let exe = std::env::current_exe()
        .map_err(|e| FuzzError::unknown("Cannot locate own executable", e))?;
    spawn_worker_with(&exe, std::env::args_os().skip(1), id, count, addr, exits)
}

fn spawn_worker_with<I>(
    exe: &Path,
    args: I,
    id: usize,
    count: usize,
    addr: std::net::SocketAddr,
    exits: mpsc::Sender<(usize, std::io::Result<ExitStatus>)>,
) -> Result<WorkerHandle>
where
    I: IntoIterator<Item = OsString>,
{
    let mut child = Command::new(exe)
        .args(args)
        .env(ENV_WORKER_ID, id.to_string())
        .env(ENV_WORKER_COUNT, count.to_string())
        .env(ENV_IPC_ADDR, addr.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FuzzError::unknown(format!("Failed to spawn worker {}", id), e))?;

    let pid = child.id();
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = &mut kill_rx => {
                let _ = child.start_kill();
                child.wait().await
            }
        };
        let _ = exits.send((id, status)).await;
    });

    Ok(WorkerHandle {
        id,
        pid,
        kill: Some(kill_tx),
        running: true,
    })
}

fn exited_cleanly(status: &std::io::Result<ExitStatus>) -> bool {
    matches!(status, Ok(s) if s.success())
}

fn describe(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(s) => s.to_string(),
        Err(e) => format!("wait failed: {}", e),
    }
}
