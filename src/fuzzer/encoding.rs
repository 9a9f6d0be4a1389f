//! Fuzz word encoding
//!
//! Words are inserted literally unless an encoding policy says otherwise.
//! The policy only affects the copy of the word that lands in the URL path;
//! headers and bodies always receive the raw word.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a word is encoded before it is placed into the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EncodingPolicy {
    /// No encoding - literal substitution
    #[default]
    Raw,
    /// Keep path-safe characters and existing `%XX` escapes, encode the rest
    Smart,
    /// Percent-encode everything outside the RFC 3986 unreserved set
    Full,
}

impl EncodingPolicy {
    /// Get short name for display
    pub fn short_name(&self) -> &'static str {
        match self {
            EncodingPolicy::Raw => "raw",
            EncodingPolicy::Smart => "smart",
            EncodingPolicy::Full => "full",
        }
    }

    /// Encode a word using this policy
    pub fn encode(&self, word: &str) -> String {
        match self {
            EncodingPolicy::Raw => word.to_string(),
            EncodingPolicy::Smart => smart_encode(word),
            EncodingPolicy::Full => url_encode(word),
        }
    }
}

impl fmt::Display for EncodingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for EncodingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "none" => Ok(EncodingPolicy::Raw),
            "smart" => Ok(EncodingPolicy::Smart),
            "full" | "url" => Ok(EncodingPolicy::Full),
            other => Err(format!("unknown encoding policy: {}", other)),
        }
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

/// URL encode (percent encoding) a string
pub fn url_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        if is_unreserved(byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Encode only what would break a path, keeping valid `%XX` sequences
pub fn smart_encode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut encoded = String::with_capacity(input.len() * 3);
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];

        // Already-escaped sequence
        if byte == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            encoded.push_str(&input[i..i + 3]);
            i += 3;
            continue;
        }

        if is_unreserved(byte) || matches!(byte, b'/' | b'?' | b':' | b'@' | b'=' | b'&') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
        i += 1;
    }
    encoded
}
