//! Match/filter policy and result records

use serde::{Deserialize, Serialize};

use crate::error::{FuzzError, Result};
use crate::http::RequestResult;

/// Parse `all`, an empty string, or a comma separated list of status codes
///
/// `all` and the empty string both mean "no constraint" and yield an empty
/// list.
pub fn parse_status_list(raw: &str) -> Result<Vec<u16>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
        return Ok(Vec::new());
    }

    let mut codes = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if item.eq_ignore_ascii_case("all") {
            return Ok(Vec::new());
        }
        let code = item
            .parse::<u16>()
            .ok()
            .filter(|c| (100..=599).contains(c))
            .ok_or_else(|| {
                FuzzError::validation(format!("Invalid status code: {}", item))
                    .with_suggestion("Use a comma separated list such as 200,301 or 'all'.")
            })?;
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    Ok(codes)
}

/// Which responses are reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPolicy {
    /// Keep only these codes; empty keeps everything
    pub matches: Vec<u16>,
    /// Drop these codes; empty drops nothing
    pub filters: Vec<u16>,
}

impl StatusPolicy {
    pub fn parse(match_status: Option<&str>, filter_status: Option<&str>) -> Result<Self> {
        Ok(Self {
            matches: parse_status_list(match_status.unwrap_or(""))?,
            filters: parse_status_list(filter_status.unwrap_or(""))?,
        })
    }

    /// Filter first, then match: a code in both lists is dropped
    pub fn allows(&self, status: u16) -> bool {
        if !self.filters.is_empty() && self.filters.contains(&status) {
            return false;
        }
        if !self.matches.is_empty() && !self.matches.contains(&status) {
            return false;
        }
        true
    }
}

/// One reported response, as written in JSON Lines mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzResult {
    pub url: String,
    pub status: u16,
    /// Total received bytes
    pub size: usize,
    pub words: Option<usize>,
    pub lines: Option<usize>,
    pub time_ms: f64,
    /// Word that produced this response
    pub fuzz: String,
}

impl FuzzResult {
    pub fn new(url: &str, word: &str, response: &RequestResult) -> Self {
        let counts = response.text_counts();
        Self {
            url: url.to_string(),
            status: response.status,
            size: response.size.total,
            words: counts.map(|c| c.words),
            lines: counts.map(|c| c.lines),
            time_ms: (response.duration_ms * 100.0).round() / 100.0,
            fuzz: word.to_string(),
        }
    }

    /// `[status]  word   size   duration`
    pub fn render_text(&self) -> String {
        format!(
            "[{}]  {}   {}   {}",
            self.status,
            self.fuzz,
            self.size,
            crate::http::format_duration(self.time_ms)
        )
    }

    /// Single-line JSON object
    pub fn render_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| FuzzError::unknown("Failed to serialize result", e))
    }

    /// Render in the selected output mode
    pub fn render(&self, json: bool) -> Result<String> {
        if json {
            self.render_json()
        } else {
            Ok(self.render_text())
        }
    }
}
