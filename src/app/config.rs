//! Application configuration management
//!
//! Defaults come from an optional TOML file; command line flags override
//! them and the merged result is a [`RunOptions`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cluster::stats::FLUSH_INTERVAL;
use crate::cluster::CoreSpec;
use crate::error::FuzzError;
use crate::fuzzer::queue::DEFAULT_CONCURRENCY;
use crate::fuzzer::{EncodingPolicy, StatusPolicy, DEFAULT_KEYWORD};
use crate::http::{EngineConfig, HeaderMap};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fuzz loop settings
    pub fuzzer: FuzzerSection,

    /// Request engine settings
    pub http: HttpSection,

    /// Worker pool settings
    pub cluster: ClusterSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerSection {
    /// Concurrent requests per worker
    pub concurrency: usize,

    /// Pause after each request in seconds
    pub delay_secs: f64,

    /// Encoding of the word in the URL path
    pub encoding: EncodingPolicy,

    /// Placeholder token
    pub keyword: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Request timeout in milliseconds (0 to disable)
    pub timeout_ms: u64,

    /// Response body bytes kept per request
    pub max_body_size: usize,

    /// Skip certificate verification
    pub insecure: bool,

    /// Idle pooled connections per host
    pub pool_max_idle_per_host: usize,

    /// Enable TCP keepalive on target connections
    pub tcp_keepalive: bool,

    /// Idle connection lifetime in seconds
    pub pool_idle_timeout_secs: u64,

    /// Headers sent with every request; `-H` lines override them
    pub headers: HeaderMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Worker count: "half", "all", "single" or a number
    pub cores: CoreSpec,

    /// Stats delta period in milliseconds
    pub flush_interval_ms: u64,

    /// Time workers get to exit after an interrupt, in milliseconds
    pub shutdown_grace_ms: u64,

    /// Worker message queue depth
    pub output_buffer: usize,
}

impl Default for FuzzerSection {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            delay_secs: 0.0,
            encoding: EncodingPolicy::Raw,
            keyword: DEFAULT_KEYWORD.to_string(),
        }
    }
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            max_body_size: 1024 * 1024, // 1MB
            insecure: false,
            pool_max_idle_per_host: 256,
            tcp_keepalive: true,
            pool_idle_timeout_secs: 60,
            headers: HeaderMap::new(),
        }
    }
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            cores: CoreSpec::Half,
            flush_interval_ms: FLUSH_INTERVAL.as_millis() as u64,
            shutdown_grace_ms: 1000,
            output_buffer: 1024,
        }
    }
}

impl HttpSection {
    /// Request engine settings described by this section
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            insecure: self.insecure,
            max_body_size: self.max_body_size,
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            pool_idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
            tcp_keepalive: self.tcp_keepalive,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// An explicit path must exist. Without one, the platform config file is
    /// used when present, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Configuration file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => match Self::default_config_path() {
                Ok(p) if p.exists() => p,
                _ => {
                    tracing::debug!("No configuration file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| "Failed to parse configuration file")?;

        tracing::debug!("Loaded configuration from {:?}", config_path);
        Ok(config)
    }

    /// Default configuration rendered as TOML
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Self::default()).context("Failed to serialize configuration")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "fuzz404", "fuzz404")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "fuzz404", "fuzz404")
            .context("Failed to determine data directory")?;

        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Everything a primary or worker needs for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Target URL with placeholder(s)
    pub url: String,
    pub method: String,
    /// Config file headers, in file order
    pub default_headers: HeaderMap,
    /// `key:value` header lines
    pub headers: Vec<String>,
    pub data: Option<String>,

    pub wordlist: PathBuf,
    pub keyword: String,

    /// JSON Lines output
    pub json: bool,
    /// Consolidated output file, written by the primary only
    pub output: Option<PathBuf>,

    pub concurrency: usize,
    pub delay: Duration,
    pub encoding: EncodingPolicy,
    pub policy: StatusPolicy,
    pub engine: EngineConfig,

    pub cores: CoreSpec,
    pub flush_interval: Duration,
    pub shutdown_grace: Duration,
    pub output_buffer: usize,
}

impl RunOptions {
    /// Reject settings that would make the run meaningless
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.concurrency == 0 {
            return Err(FuzzError::validation("Concurrency must be greater than 0"));
        }
        if self.engine.max_body_size == 0 {
            return Err(FuzzError::validation("max_body_size must be greater than 0"));
        }
        if self.flush_interval.is_zero() {
            return Err(FuzzError::validation("flush_interval_ms must be greater than 0"));
        }
        if self.output_buffer == 0 {
            return Err(FuzzError::validation("output_buffer must be greater than 0"));
        }
        if self.keyword.is_empty() {
            return Err(FuzzError::validation("Placeholder keyword cannot be empty"));
        }
        Ok(())
    }
}

/// Seconds as given on the command line or in the config file
pub fn delay_from_secs(secs: f64) -> crate::error::Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        FuzzError::validation(format!("Invalid delay: {}", secs))
            .with_suggestion("Use a non-negative number of seconds, e.g. --delay 0.5")
    })
}
