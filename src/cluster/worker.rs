//! Worker process
//!
//! A worker is the same binary started by the primary with its identity in
//! the environment. It fuzzes one shard of the wordlist, ships stat deltas
//! and (with `-o`) result lines to the primary, and exits when the shard is
//! done or a termination signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info_span, Instrument};

use super::ipc::IpcChannel;
use super::output::{RelaySink, ResultSink, StdoutSink};
use super::stats::StatsReporter;
use super::{ShutdownSignal, ENV_IPC_ADDR, ENV_WORKER_COUNT, ENV_WORKER_ID};
use crate::app::RunOptions;
use crate::error::{FuzzError, Result};
use crate::fuzzer::{FuzzEngine, FuzzTarget, FuzzerConfig, ShardAssignment, WordlistShard};
use crate::http::RequestEngine;

/// How long an interrupted worker waits for its last messages to go out
const INTERRUPT_FLUSH: Duration = Duration::from_millis(250);

/// Identity handed to a worker by the primary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub shard: ShardAssignment,
    pub ipc_addr: SocketAddr,
}

impl WorkerIdentity {
    /// Read the identity from the environment; `None` in the primary
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_vars(
            std::env::var(ENV_WORKER_ID).ok(),
            std::env::var(ENV_WORKER_COUNT).ok(),
            std::env::var(ENV_IPC_ADDR).ok(),
        )
    }

    fn from_vars(
        id: Option<String>,
        count: Option<String>,
        addr: Option<String>,
    ) -> Result<Option<Self>> {
        let Some(id) = id else {
            return Ok(None);
        };

        let invalid = |what: &str| FuzzError::Unknown {
            message: format!("Invalid worker environment: {}", what),
            source: None,
        };

        let id = id.trim().parse::<usize>().map_err(|_| invalid(ENV_WORKER_ID))?;
        let count = count
            .and_then(|c| c.trim().parse::<usize>().ok())
            .ok_or_else(|| invalid(ENV_WORKER_COUNT))?;
        let ipc_addr = addr
            .and_then(|a| a.trim().parse::<SocketAddr>().ok())
            .ok_or_else(|| invalid(ENV_IPC_ADDR))?;

        Ok(Some(Self {
            shard: ShardAssignment::new(id, count)?,
            ipc_addr,
        }))
    }
}

/// Run one worker to completion
///
/// Returns `Ok` after the shard is done or after a termination signal.
pub async fn run(identity: WorkerIdentity, options: RunOptions) -> Result<()> {
    let span = info_span!(
        "worker",
        id = identity.shard.worker_id,
        count = identity.shard.worker_count
    );
    run_shard(identity, options).instrument(span).await
}

async fn run_shard(identity: WorkerIdentity, options: RunOptions) -> Result<()> {
    let mut signals = ShutdownSignal::register()?;

    let target = FuzzTarget::prepare(
        &options.url,
        &options.method,
        &options.default_headers,
        &options.headers,
        options.data.as_deref(),
        &options.keyword,
    )?;

    let ipc = IpcChannel::connect(identity.ipc_addr, options.output_buffer).await?;
    let reporter = StatsReporter::new(ipc.sender(), options.flush_interval);

    let sink: Arc<dyn ResultSink> = if options.output.is_some() {
        Arc::new(RelaySink::new(ipc.sender()))
    } else {
        Arc::new(StdoutSink::new())
    };

    let requester = Arc::new(RequestEngine::new(
        target.template.endpoint.clone(),
        options.engine.clone(),
    )?);
    let engine = FuzzEngine::new(
        FuzzerConfig {
            concurrency: options.concurrency,
            delay: options.delay,
            encoding: options.encoding,
            policy: options.policy.clone(),
            json: options.json,
        },
        requester,
        reporter.clone(),
        sink,
    )?;

    let mut shard = WordlistShard::open(&options.wordlist, identity.shard).await?;
    reporter.start();
    debug!("Worker started");

    let (outcome, interrupted) = tokio::select! {
        outcome = engine.fuzz(&target.template, &target.placeholders, &mut shard) => (outcome, false),
        signal = signals.recv() => {
            debug!(signal, "Worker stopping");
            (Ok(Default::default()), true)
        }
    };

    // Dropping the engine aborts in-flight requests and releases its sink
    drop(engine);
    let flushed = reporter.stop().await;
    drop(reporter);

    if interrupted {
        let _ = tokio::time::timeout(INTERRUPT_FLUSH, ipc.close()).await;
        return Ok(());
    }

    let closed = ipc.close().await;
    let summary = outcome?;
    flushed?;
    closed?;
    debug!(submitted = summary.submitted, "Worker finished");
    Ok(())
}
