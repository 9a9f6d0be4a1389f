//! Fuzzer module - wordlist driven request fuzzing
//!
//! Locates the placeholder token in a request template, streams a shard of
//! the wordlist, and pushes one request per word through a bounded queue.

pub mod encoding;
pub mod engine;
pub mod payloads;
pub mod placeholder;
pub mod queue;
pub mod results;

pub use encoding::EncodingPolicy;
pub use engine::{FuzzEngine, FuzzerConfig};
pub use payloads::{count_words, validate_wordlist, ShardAssignment, WordlistShard, WordlistSpec};
pub use placeholder::DEFAULT_KEYWORD;
pub use results::StatusPolicy;

use placeholder::PlaceholderMap;

use crate::error::{FuzzError, Result};
use crate::http::{HeaderInput, HeaderMap, RequestTemplate};

/// A validated template together with its placeholder positions
#[derive(Debug, Clone)]
pub struct FuzzTarget {
    pub template: RequestTemplate,
    pub placeholders: PlaceholderMap,
}

impl FuzzTarget {
    /// Parse the request pieces and make sure `keyword` occurs somewhere
    ///
    /// `default_headers` come first; command line `headers` override them.
    pub fn prepare(
        url: &str,
        method: &str,
        default_headers: &HeaderMap,
        headers: &[String],
        data: Option<&str>,
        keyword: &str,
    ) -> Result<Self> {
        if authority(url).contains(keyword) {
            return Err(FuzzError::validation(format!(
                "Host fuzzing is not supported: {} found in the host of {}",
                keyword, url
            ))
            .with_suggestion(format!(
                "Fix the host and put {} in the path, a header or the body instead",
                keyword
            )));
        }

        let headers = HeaderInput::Map(default_headers.clone())
            .merge(HeaderInput::Lines(headers.to_vec()))?;
        let template = RequestTemplate::parse(url, method, headers, data)?;
        let placeholders = PlaceholderMap::locate(&template, keyword);

        if !placeholders.is_fuzzable() {
            return Err(FuzzError::validation(format!(
                "No {} keyword found in URL, headers or body",
                keyword
            ))
            .with_suggestion(format!(
                "Put {} where the words should go, e.g. https://example.com/{}",
                keyword, keyword
            )));
        }

        Ok(Self {
            template,
            placeholders,
        })
    }
}

/// `host[:port]` part of a raw URL, with or without a scheme
fn authority(url: &str) -> &str {
    let url = url.trim();
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    &rest[..end]
}
