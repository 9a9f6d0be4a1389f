//! Result sinks
//!
//! Without `-o` every worker prints to its own stdout. With `-o` workers
//! relay lines to the primary, which is the only process that opens the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, Mutex};

use super::ipc::{IpcSender, WorkerMessage};
use super::stats::ClusterStats;
use crate::error::{FuzzError, Result};

/// Destination for formatted result lines
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Write one line; suspends while the destination is saturated
    async fn emit(&self, line: String) -> Result<()>;

    /// Push buffered lines to their destination
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes lines straight to this process's stdout
pub struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultSink for StdoutSink {
    async fn emit(&self, mut line: String) -> Result<()> {
        line.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Forwards lines to the primary as `OUTPUT_RESULT` messages
pub struct RelaySink {
    sender: IpcSender,
}

impl RelaySink {
    pub fn new(sender: IpcSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ResultSink for RelaySink {
    async fn emit(&self, line: String) -> Result<()> {
        self.sender.send(WorkerMessage::OutputResult { data: line }).await
    }
}

/// The consolidated output file, owned by the primary
pub struct OutputFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl OutputFile {
    /// Create or truncate `path`
    pub async fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).await.map_err(|e| {
            FuzzError::validation(format!(
                "Cannot open output file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for OutputFile {
    async fn emit(&self, mut line: String) -> Result<()> {
        line.push('\n');
        // BufWriter flushes to the file when its buffer fills, suspending here
        self.writer.lock().await.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}

/// Apply worker messages on the primary until every sender is gone
///
/// Stat deltas update `stats`; result lines go to `sink`, one at a time, so
/// a slow sink holds back the channel and, through it, the workers.
pub async fn route_messages(
    mut rx: mpsc::Receiver<WorkerMessage>,
    stats: Arc<SyncMutex<ClusterStats>>,
    sink: Arc<dyn ResultSink>,
) -> Result<u64> {
    let mut lines = 0;
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::OutputResult { data } => {
                sink.emit(data).await?;
                lines += 1;
            }
            delta => stats.lock().apply(&delta),
        }
    }
    sink.flush().await?;
    Ok(lines)
}
