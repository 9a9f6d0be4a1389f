//! HTTP request types
//!
//! A [`RequestTemplate`] is built once per run from the command line and is
//! never mutated afterwards. Each fuzz word yields a fresh [`FuzzedRequest`].

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

use super::wire::{is_token, is_valid_header_value};
use crate::error::{FuzzError, Result};

/// Request headers in the order they were given
pub type HeaderMap = IndexMap<String, String>;

/// Supported protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Where requests go: scheme, host and optional explicit port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: Protocol,

    /// Target host name (IPv6 literals keep their brackets)
    pub hostname: String,

    /// Explicit port from the URL, if any
    pub port: Option<u16>,
}

impl Endpoint {
    /// Port to connect to
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// Host name without IPv6 brackets, as used for DNS and TLS
    pub fn bare_host(&self) -> &str {
        self.hostname
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.hostname)
    }

    /// `Host` header value
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.hostname, port),
            None => self.hostname.clone(),
        }
    }

    /// `scheme://host[:port]`
    pub fn origin(&self) -> String {
        format!("{}://{}", self.protocol, self.host_header())
    }
}

/// Headers as they arrive from the outside world
///
/// The CLI hands over repeatable `key:value` strings, the config file a
/// ready map. Both are normalized with [`HeaderInput::into_map`].
#[derive(Debug, Clone)]
pub enum HeaderInput {
    Lines(Vec<String>),
    Map(HeaderMap),
}

impl HeaderInput {
    /// Normalize into an ordered key -> value map; a repeated key keeps its
    /// first position and its last value
    pub fn into_map(self) -> Result<HeaderMap> {
        match self {
            HeaderInput::Map(map) => Ok(map),
            HeaderInput::Lines(lines) => {
                let mut headers = HeaderMap::with_capacity(lines.len());
                for line in lines {
                    let (key, value) = parse_header_line(&line)?;
                    headers.insert(key, value);
                }
                Ok(headers)
            }
        }
    }

    /// Layer `overrides` on top of these headers
    pub fn merge(self, overrides: HeaderInput) -> Result<HeaderMap> {
        let mut headers = self.into_map()?;
        headers.extend(overrides.into_map()?);
        Ok(headers)
    }
}

/// Split a `key:value` header at the first colon
pub fn parse_header_line(line: &str) -> Result<(String, String)> {
    let Some((key, value)) = line.split_once(':') else {
        return Err(FuzzError::validation(format!(
            "Invalid header format: \"{}\". Must be \"key: value\"",
            line
        )));
    };

    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return Err(FuzzError::validation(format!(
            "Invalid header: \"{}\". key and value cannot be empty.",
            line
        )));
    }

    Ok((key.to_string(), value.to_string()))
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent verbatim
    Raw(String),
    /// Serialized to compact JSON before sending
    Structured(serde_json::Value),
}

impl RequestBody {
    /// Interpret command line data: JSON objects and arrays become structured
    pub fn from_data(data: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(value) if value.is_object() || value.is_array() => RequestBody::Structured(value),
            _ => RequestBody::Raw(data.to_string()),
        }
    }

    /// Canonical text form of the body
    pub fn to_text(&self) -> String {
        match self {
            RequestBody::Raw(text) => text.clone(),
            RequestBody::Structured(value) => value.to_string(),
        }
    }
}

/// Immutable base request that fuzz words are substituted into
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub endpoint: Endpoint,

    /// Path including the query component
    pub path: String,

    /// Upper-cased HTTP method
    pub method: String,

    /// Headers in command line order
    pub headers: HeaderMap,

    /// Optional body
    pub body: Option<RequestBody>,
}

impl RequestTemplate {
    /// Build a template from raw command line pieces
    pub fn parse(
        url: &str,
        method: &str,
        headers: HeaderMap,
        data: Option<&str>,
    ) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(FuzzError::validation("url is required!"));
        }

        let lowered = url.to_ascii_lowercase();
        let with_scheme = if lowered.starts_with("http://") || lowered.starts_with("https://") {
            url.to_string()
        } else if url.contains("://") {
            // Let the protocol check below reject it with a precise message
            url.to_string()
        } else {
            format!("http://{}", url)
        };

        let parsed = Url::parse(&with_scheme).map_err(|e| {
            FuzzError::validation(format!("Invalid URL format: {} ({})", url, e))
        })?;

        let protocol = match parsed.scheme() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            other => {
                return Err(FuzzError::validation(format!(
                    "Unsupported protocol: {}. Only http or https are supported!",
                    other
                )))
            }
        };

        let hostname = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FuzzError::validation(format!("Invalid URL format: {} (no host)", url)))?
            .to_string();

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let method = method.trim().to_uppercase();
        if !is_token(&method) {
            return Err(FuzzError::validation(format!("Invalid HTTP method: {}", method)));
        }

        for (key, value) in &headers {
            if !is_token(key) || !is_valid_header_value(value) {
                return Err(FuzzError::validation(format!(
                    "Invalid header: \"{}: {}\"",
                    key, value
                )));
            }
        }

        Ok(Self {
            endpoint: Endpoint {
                protocol,
                hostname,
                port: parsed.port(),
            },
            path,
            method,
            headers,
            body: data.filter(|d| !d.is_empty()).map(RequestBody::from_data),
        })
    }

    /// Full URL for a given path, as reported in results
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.origin(), path)
    }
}

/// Concrete request produced for one fuzz word
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzedRequest {
    pub method: String,
    /// Origin plus `path`, for reporting
    pub url: String,
    /// Request target, sent exactly as substituted
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}
