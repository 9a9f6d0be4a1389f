//! Per-worker fuzz loop
//!
//! Pulls words from the shard, substitutes them into the template, and hands
//! each request to the bounded queue. Every task sends one request, applies
//! the status policy and writes matching results to the sink.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::encoding::EncodingPolicy;
use super::payloads::WordlistShard;
use super::placeholder::{substitute, PlaceholderMap};
use super::queue::{FuzzQueue, DEFAULT_CONCURRENCY};
use super::results::{FuzzResult, StatusPolicy};
use crate::cluster::output::ResultSink;
use crate::cluster::stats::StatsReporter;
use crate::error::Result;
use crate::http::{FuzzedRequest, RequestEngine, RequestTemplate};

/// Fuzz loop configuration
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// Maximum in-flight requests
    pub concurrency: usize,

    /// Pause after every completed request
    pub delay: Duration,

    /// Encoding applied to the word in the path
    pub encoding: EncodingPolicy,

    /// Which statuses are reported
    pub policy: StatusPolicy,

    /// Render results as JSON Lines
    pub json: bool,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            delay: Duration::ZERO,
            encoding: EncodingPolicy::Raw,
            policy: StatusPolicy::default(),
            json: false,
        }
    }
}

/// What a finished shard amounted to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FuzzSummary {
    /// Words submitted from this shard
    pub submitted: usize,
}

/// State shared by every task of a run
struct TaskContext {
    requester: Arc<RequestEngine>,
    policy: StatusPolicy,
    delay: Duration,
    json: bool,
    stats: Arc<StatsReporter>,
    sink: Arc<dyn ResultSink>,
}

/// Drives one shard through the request engine
pub struct FuzzEngine {
    queue: FuzzQueue,
    encoding: EncodingPolicy,
    ctx: Arc<TaskContext>,
}

impl FuzzEngine {
    pub fn new(
        config: FuzzerConfig,
        requester: Arc<RequestEngine>,
        stats: Arc<StatsReporter>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        Ok(Self {
            queue: FuzzQueue::new(config.concurrency)?,
            encoding: config.encoding,
            ctx: Arc::new(TaskContext {
                requester,
                policy: config.policy,
                delay: config.delay,
                json: config.json,
                stats,
                sink,
            }),
        })
    }

    /// Fuzz every word of `shard` and wait for the last request to finish
    ///
    /// Non-fatal request errors are counted and skipped. The first fatal
    /// error stops submission and is returned.
    pub async fn fuzz(
        &self,
        template: &RequestTemplate,
        placeholders: &PlaceholderMap,
        shard: &mut WordlistShard,
    ) -> Result<FuzzSummary> {
        let mut summary = FuzzSummary::default();

        while let Some(word) = shard.next_word().await? {
            let request = substitute(template, placeholders, &word, self.encoding);
            self.queue
                .submit(attempt(self.ctx.clone(), word, request))
                .await?;
            summary.submitted += 1;
        }

        self.queue.drain().await?;
        debug!(submitted = summary.submitted, "Shard finished");
        Ok(summary)
    }
}

async fn attempt(ctx: Arc<TaskContext>, word: String, request: FuzzedRequest) -> Result<()> {
    let outcome = ctx.requester.send(&request).await;

    if !ctx.delay.is_zero() {
        tokio::time::sleep(ctx.delay).await;
    }

    let response = match outcome {
        Ok(response) => response,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            ctx.stats.update(false);
            trace!(url = %request.url, category = %e.category(), error = %e, "Request failed");
            return Ok(());
        }
    };

    ctx.stats.update(true);
    trace!(
        url = %request.url,
        status = response.status,
        reason = %response.status_message,
        version = %response.http_version,
        body_bytes = response.size.body,
        header_bytes = response.size.headers,
        truncated = response.truncated,
        "Response"
    );
    if !ctx.policy.allows(response.status) {
        return Ok(());
    }

    let line = FuzzResult::new(&request.url, &word, &response).render(ctx.json)?;
    ctx.sink.emit(line).await
}
