//! Worker to primary messaging
//!
//! Each worker opens one loopback TCP connection to the primary and writes
//! newline-delimited JSON messages on it. Both ends use bounded queues, so a
//! slow consumer on the primary eventually suspends producers in the workers.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::error::{FuzzError, Result};

/// Message sent from a worker to the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    /// Successful requests since the last flush
    #[serde(rename = "rps-success")]
    RpsSuccess { count: u64 },

    /// Failed requests since the last flush
    #[serde(rename = "rps-error")]
    RpsError { count: u64 },

    /// A formatted result line for the shared output file
    #[serde(rename = "OUTPUT_RESULT")]
    OutputResult { data: String },
}

/// Cloneable handle used to queue messages for the writer task
#[derive(Debug, Clone)]
pub struct IpcSender {
    tx: mpsc::Sender<WorkerMessage>,
}

impl IpcSender {
    /// Queue a message, suspending while the channel is full
    pub async fn send(&self, message: WorkerMessage) -> Result<()> {
        self.tx.send(message).await.map_err(|_| {
            FuzzError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection to primary closed",
            ))
        })
    }
}

/// Worker side of the channel: a sender plus the task draining it
pub struct IpcChannel {
    sender: IpcSender,
    writer: JoinHandle<Result<()>>,
}

impl IpcChannel {
    /// Connect to the primary's listener
    pub async fn connect(addr: SocketAddr, buffer: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|e| FuzzError::Unknown {
            message: format!("Failed to connect to primary at {}", addr),
            source: Some(Box::new(e)),
        })?;
        stream.set_nodelay(true)?;
        Ok(Self::from_writer(stream, buffer))
    }

    /// Run the channel over any byte sink
    pub fn from_writer<W>(writer: W, buffer: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let writer = tokio::spawn(write_messages(writer, rx));
        Self {
            sender: IpcSender { tx },
            writer,
        }
    }

    pub fn sender(&self) -> IpcSender {
        self.sender.clone()
    }

    /// Drop this handle's sender and wait until everything queued is written
    ///
    /// Only completes once every other [`IpcSender`] clone is gone too.
    pub async fn close(self) -> Result<()> {
        drop(self.sender);
        self.writer
            .await
            .map_err(|e| FuzzError::unknown("IPC writer task failed", e))?
    }
}

async fn write_messages<W>(writer: W, mut rx: mpsc::Receiver<WorkerMessage>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message)
            .map_err(|e| FuzzError::unknown("Failed to encode IPC message", e))?;
        line.push(b'\n');
        writer.write_all(&line).await?;

        // Write out in batches: flush once nothing else is waiting
        if rx.is_empty() {
            writer.flush().await?;
        }
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

/// Bind the primary's loopback listener
pub async fn bind() -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

/// How long the acceptor keeps polling the backlog after being stopped
const BACKLOG_DRAIN: Duration = Duration::from_millis(100);

/// Accept up to `expected` worker connections and forward their messages
///
/// Accepting ends when every worker has connected or `stop` fires; the task
/// then finishes once every accepted connection reached EOF. Forwarding
/// suspends while `tx` is full.
pub fn spawn_acceptor(
    listener: TcpListener,
    expected: usize,
    tx: mpsc::Sender<WorkerMessage>,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut readers = JoinSet::new();
        let mut accepted = 0;

        while accepted < expected {
            tokio::select! {
                conn = listener.accept() => match conn {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Worker connected");
                        readers.spawn(read_messages(stream, tx.clone()));
                        accepted += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept worker connection");
                        break;
                    }
                },
                _ = &mut stop => {
                    // Workers may have connected and exited before being accepted
                    while accepted < expected {
                        match tokio::time::timeout(BACKLOG_DRAIN, listener.accept()).await {
                            Ok(Ok((stream, _))) => {
                                readers.spawn(read_messages(stream, tx.clone()));
                                accepted += 1;
                            }
                            _ => break,
                        }
                    }
                    break;
                }
            }
        }
        drop(tx);
        drop(listener);

        while let Some(done) = readers.join_next().await {
            if let Ok(Err(e)) = done {
                warn!(error = %e, "Worker connection failed");
            }
        }
    })
}

/// Decode newline-delimited messages until EOF
pub async fn read_messages<R>(reader: R, tx: mpsc::Sender<WorkerMessage>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerMessage>(&line) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Discarding malformed worker message"),
        }
    }
    Ok(())
}
