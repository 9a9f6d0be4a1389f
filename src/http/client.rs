//! Request engine
//!
//! Sends exactly one HTTP(S) round trip per call over keep-alive
//! connections private to the process. No redirects and no retries, except
//! that a pooled connection found closed before anything was received is
//! replaced once by a fresh one. The response is reported exactly as the
//! server produced it, with the body buffered up to a fixed cap.

use std::io;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::trace;

use super::request::{Endpoint, FuzzedRequest};
use super::response::{RequestResult, SizeBreakdown};
use super::transport::{Connector, Stream};
use super::wire::{encode_request, read_body, read_head};
use crate::error::{FuzzError, Result};

/// Request engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-request deadline; `None` waits forever
    pub timeout: Option<Duration>,
    /// Skip certificate verification
    pub insecure: bool,
    /// Maximum body bytes buffered per response
    pub max_body_size: usize,
    /// Idle keep-alive connections kept per host
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection survives
    pub pool_idle_timeout: Duration,
    /// Enable TCP keepalive on every socket
    pub tcp_keepalive: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            insecure: false,
            max_body_size: 1024 * 1024, // 1MB
            pool_max_idle_per_host: 256,
            pool_idle_timeout: Duration::from_secs(60),
            tcp_keepalive: true,
        }
    }
}

type Connection = BufReader<Stream>;

struct Idle {
    conn: Connection,
    since: Instant,
}

/// Why a round trip produced no response
enum RoundTripError {
    /// The connection was already closed by the peer; nothing was received
    Closed,
    Failed(FuzzError),
}

impl From<io::Error> for RoundTripError {
    fn from(err: io::Error) -> Self {
        RoundTripError::Failed(FuzzError::Http(err.to_string()))
    }
}

/// Pooled single-shot HTTP engine for one endpoint
pub struct RequestEngine {
    connector: Connector,
    config: EngineConfig,
    /// Idle connections, most recently used last
    pool: Mutex<Vec<Idle>>,
}

impl RequestEngine {
    pub fn new(endpoint: Endpoint, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            connector: Connector::new(endpoint, &config)?,
            config,
            pool: Mutex::new(Vec::new()),
        })
    }

    /// Perform one round trip, honouring the configured timeout
    ///
    /// On expiry the in-flight exchange is dropped, which closes its
    /// connection, and a `timeout` error is returned.
    pub async fn send(&self, request: &FuzzedRequest) -> Result<RequestResult> {
        let message = encode_request(request, self.connector.endpoint())?;
        let exchange = self.exchange(&request.method, &message);

        match self.config.timeout {
            Some(limit) if !limit.is_zero() => match tokio::time::timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => Err(FuzzError::Timeout(limit.as_millis() as u64)),
            },
            _ => exchange.await,
        }
    }

    async fn exchange(&self, method: &str, message: &[u8]) -> Result<RequestResult> {
        let start = Instant::now();

        if let Some(conn) = self.checkout() {
            match self.round_trip(conn, method, message, start).await {
                Ok(result) => return Ok(result),
                Err(RoundTripError::Failed(e)) => return Err(e),
                Err(RoundTripError::Closed) => trace!("Pooled connection was closed, reconnecting"),
            }
        }

        let conn = BufReader::new(self.connector.connect().await?);
        match self.round_trip(conn, method, message, start).await {
            Ok(result) => Ok(result),
            Err(RoundTripError::Failed(e)) => Err(e),
            Err(RoundTripError::Closed) => Err(FuzzError::Http(
                "server closed the connection without responding".into(),
            )),
        }
    }

    async fn round_trip(
        &self,
        mut conn: Connection,
        method: &str,
        message: &[u8],
        start: Instant,
    ) -> std::result::Result<RequestResult, RoundTripError> {
        let sent = async {
            let stream = conn.get_mut();
            stream.write_all(message).await?;
            stream.flush().await
        }
        .await;
        if let Err(e) = sent {
            return Err(closed_or_failed(e));
        }

        let head = match read_head(&mut conn).await {
            Ok(Some(head)) => head,
            Ok(None) => return Err(RoundTripError::Closed),
            Err(e) => return Err(closed_or_failed(e)),
        };
        let framing = head.framing(method)?;
        let body = read_body(&mut conn, framing, self.config.max_body_size).await?;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        if body.complete && head.keep_alive() && conn.buffer().is_empty() {
            self.checkin(conn);
        }

        Ok(RequestResult {
            status: head.status,
            status_message: head.reason,
            http_version: head.version,
            duration_ms,
            size: SizeBreakdown::new(body.bytes.len(), head.header_bytes),
            body: body.bytes,
            truncated: body.truncated,
        })
    }

    /// Most recently used live connection; expired ones are discarded
    fn checkout(&self) -> Option<Connection> {
        let mut pool = self.pool.lock();
        while let Some(idle) = pool.pop() {
            if idle.since.elapsed() < self.config.pool_idle_timeout {
                return Some(idle.conn);
            }
            // Everything below is older still
            pool.clear();
        }
        None
    }

    fn checkin(&self, conn: Connection) {
        let mut pool = self.pool.lock();
        if pool.len() < self.config.pool_max_idle_per_host {
            pool.push(Idle {
                conn,
                since: Instant::now(),
            });
        }
    }
}

/// A peer that reset or closed the socket before answering counts as a
/// closed connection
fn closed_or_failed(err: io::Error) -> RoundTripError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => RoundTripError::Closed,
        _ => err.into(),
    }
}
