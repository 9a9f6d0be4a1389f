//! Error types for fuzz404
//!
//! Every failure the fuzzer can hit is tagged with an [`ErrorCategory`].
//! Validation, wordlist read and unknown errors are fatal and stop the
//! process that raised them; everything else is an expected network outcome
//! that is counted and swallowed by the fuzz loop.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, FuzzError>;

/// Error category, mirrored in logs and user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input detected before or while building requests
    Validation,
    /// Host resolution failure
    Dns,
    /// Per-request deadline exceeded
    Timeout,
    /// Connection refused, host or network unreachable
    Network,
    /// TLS handshake or certificate verification failure
    Ssl,
    /// HTTP protocol failure (malformed response, aborted exchange)
    Http,
    /// Wordlist stream failure
    ReadFile,
    /// Anything not covered above; indicates a defect
    Unknown,
}

impl ErrorCategory {
    /// Short lowercase name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Dns => "dns",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Ssl => "ssl",
            ErrorCategory::Http => "http",
            ErrorCategory::ReadFile => "read_file",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Whether errors of this category halt the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Validation | ErrorCategory::ReadFile | ErrorCategory::Unknown
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network failure flavours that share the `network` category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    ConnectionRefused,
    HostUnreachable,
    NetworkUnreachable,
    ConnectionFailed,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NetworkFailure::ConnectionRefused => "Connection refused",
            NetworkFailure::HostUnreachable => "Host unreachable",
            NetworkFailure::NetworkUnreachable => "Network unreachable",
            NetworkFailure::ConnectionFailed => "Connection failed",
        };
        f.write_str(text)
    }
}

/// Main error type for fuzz404 operations
#[derive(Error, Debug)]
pub enum FuzzError {
    /// Malformed input: URL, protocol, header, wordlist, missing placeholder
    #[error("{message}")]
    Validation {
        message: String,
        suggestion: Option<String>,
    },

    /// Host resolution failed
    #[error("Could not resolve host: {host}")]
    Dns { host: String },

    /// Request deadline exceeded
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Connection level failure
    #[error("{kind}: {target}")]
    Network { kind: NetworkFailure, target: String },

    /// Certificate verification or handshake failure
    #[error("SSL certification verification failed: {0}")]
    Ssl(String),

    /// HTTP exchange failed after the connection was established
    #[error("HTTP exchange failed: {0}")]
    Http(String),

    /// Wordlist stream failed mid-read
    #[error("Failed to read wordlist {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O errors outside the wordlist stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unclassified failure
    #[error("{message}")]
    Unknown {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FuzzError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        FuzzError::Validation {
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create an unknown error wrapping a source
    pub fn unknown<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FuzzError::Unknown {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Attach a remediation hint to a validation error
    pub fn with_suggestion(self, hint: impl Into<String>) -> Self {
        match self {
            FuzzError::Validation { message, .. } => FuzzError::Validation {
                message,
                suggestion: Some(hint.into()),
            },
            other => other,
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            FuzzError::Validation { .. } => ErrorCategory::Validation,
            FuzzError::Dns { .. } => ErrorCategory::Dns,
            FuzzError::Timeout(_) => ErrorCategory::Timeout,
            FuzzError::Network { .. } => ErrorCategory::Network,
            FuzzError::Ssl(_) => ErrorCategory::Ssl,
            FuzzError::Http(_) => ErrorCategory::Http,
            FuzzError::ReadFile { .. } => ErrorCategory::ReadFile,
            FuzzError::Io(_) | FuzzError::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    /// Whether this error must stop the process
    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> Option<String>;
}

impl UserHint for FuzzError {
    fn user_hint(&self) -> Option<String> {
        match self {
            FuzzError::Validation { suggestion, .. } => suggestion.clone(),
            FuzzError::Ssl(_) => Some(
                "use --insecure flag to bypass certification verification (not recommended)"
                    .into(),
            ),
            FuzzError::Dns { host } => Some(format!("Check that '{}' is spelled correctly.", host)),
            FuzzError::Timeout(ms) => Some(format!(
                "The server did not answer within {}ms. Try a larger --timeout.",
                ms
            )),
            FuzzError::ReadFile { .. } => {
                Some("Please check that the file is readable and not corrupted.".into())
            }
            _ => None,
        }
    }
}
