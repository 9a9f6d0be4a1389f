//! HTTP response types

use serde::Serialize;

/// Byte-size breakdown of a received response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeBreakdown {
    /// Body bytes actually buffered
    pub body: usize,
    /// Sum of header name and value bytes as received
    pub headers: usize,
    /// body + headers
    pub total: usize,
}

impl SizeBreakdown {
    pub fn new(body: usize, headers: usize) -> Self {
        Self {
            body,
            headers,
            total: body + headers,
        }
    }
}

/// Outcome of one completed HTTP round trip
#[derive(Debug, Clone)]
pub struct RequestResult {
    /// HTTP status code
    pub status: u16,

    /// Reason phrase as sent by the server (e.g., "OK", "Not Found")
    pub status_message: String,

    /// HTTP version as `major.minor`
    pub http_version: String,

    /// Wall time from send to last buffered byte
    pub duration_ms: f64,

    /// Buffered body, capped at the engine's maximum
    pub body: Vec<u8>,

    /// Whether the body cap cut the response short
    pub truncated: bool,

    /// Size breakdown
    pub size: SizeBreakdown,
}

impl RequestResult {
    /// Word and line counts, only for printable text bodies
    pub fn text_counts(&self) -> Option<TextCounts> {
        TextCounts::of(&self.body)
    }
}

/// Word and line counts of a printable body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCounts {
    pub words: usize,
    pub lines: usize,
}

impl TextCounts {
    /// Count words and lines; `None` when the body is not printable text
    pub fn of(body: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(body).ok()?;
        if text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return None;
        }

        Some(Self {
            words: text.split_whitespace().count(),
            lines: text.lines().count(),
        })
    }
}

/// Milliseconds below one second, seconds above
pub fn format_duration(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{:.2}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}
