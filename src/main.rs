//! fuzz404 - multi-process HTTP fuzzer
//!
//! Substitutes wordlist entries into a FUZZ placeholder in the URL, headers
//! or body and reports the responses. The process started by the user is the
//! primary; it re-executes itself once per shard to run the workers.

mod app;
mod cluster;
mod error;
mod fuzzer;
mod http;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::{delay_from_secs, Config, RunOptions};
use crate::cluster::{CoreSpec, WorkerIdentity, ENV_DEBUG};
use crate::error::{ErrorCategory, FuzzError, UserHint};
use crate::fuzzer::{EncodingPolicy, StatusPolicy, WordlistSpec};

/// Multi-process HTTP fuzzer
#[derive(Parser, Debug)]
#[command(name = "fuzz404")]
#[command(author, version, about = "Multi-process HTTP fuzzer", long_about = None)]
struct Cli {
    /// Target URL, e.g. https://example.com/FUZZ
    #[arg(required_unless_present = "generate_config")]
    url: Option<String>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request body
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// Request header "key:value" (repeatable)
    #[arg(short = 'H', long = "header", action = ArgAction::Append)]
    headers: Vec<String>,

    /// Wordlist path, optionally path:KEYWORD
    #[arg(short = 'w', long, required_unless_present = "generate_config")]
    wordlist: Option<String>,

    /// Print results as JSON Lines and hide the status line
    #[arg(long)]
    json: bool,

    /// Write all results to this file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip TLS certificate verification
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Pause after each request, in seconds
    #[arg(long)]
    delay: Option<f64>,

    /// Concurrent requests per worker
    #[arg(short = 't', long = "concurrent")]
    concurrent: Option<usize>,

    /// Only report these status codes (comma list or "all")
    #[arg(short = 'm', long = "match-status")]
    match_status: Option<String>,

    /// Never report these status codes (comma list or "all")
    #[arg(short = 'f', long = "filter-status")]
    filter_status: Option<String>,

    /// Worker processes: half, all, single or a number
    #[arg(short = 'c', long)]
    cores: Option<String>,

    /// Encoding of the word in the URL path
    #[arg(long = "encode", value_enum)]
    encode: Option<EncodingPolicy>,

    /// Response body bytes kept per request
    #[arg(long)]
    max_body_size: Option<usize>,

    /// Configuration file path
    #[arg(long, env = "FUZZ404_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FUZZ404_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, env = "FUZZ404_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "FUZZ404_LOG_JSON")]
    log_json: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    generate_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.generate_config {
        return match Config::default_toml() {
            Ok(toml) => {
                println!("{}", toml);
                ExitCode::SUCCESS
            }
            Err(e) => {
                report(&e);
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = init_logging(&cli) {
        eprintln!("error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

/// Pick the role from the environment and run it on a single-threaded runtime
fn run(cli: Cli) -> Result<ExitCode> {
    let identity = WorkerIdentity::from_env()?;
    let config = Config::load(cli.config.as_deref())?;
    let options = build_options(&cli, &config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match identity {
        Some(identity) => {
            runtime.block_on(cluster::worker::run(identity, options))?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Starting fuzz404");
            let outcome = runtime.block_on(cluster::primary::run(options))?;
            Ok(ExitCode::from(outcome.exit_code()))
        }
    }
}

/// Merge command line flags over the configuration file
fn build_options(cli: &Cli, config: &Config) -> Result<RunOptions> {
    let url = cli.url.clone().context("url is required!")?;
    let wordlist = WordlistSpec::parse(cli.wordlist.as_deref().context("wordlist is required!")?);

    let mut http = config.http.clone();
    if let Some(timeout) = cli.timeout {
        http.timeout_ms = timeout;
    }
    if cli.insecure {
        http.insecure = true;
    }
    if let Some(max) = cli.max_body_size {
        http.max_body_size = max;
    }

    let options = RunOptions {
        url,
        method: cli.method.clone(),
        default_headers: http.headers.clone(),
        headers: cli.headers.clone(),
        data: cli.data.clone(),
        wordlist: wordlist.path,
        keyword: wordlist
            .keyword
            .unwrap_or_else(|| config.fuzzer.keyword.clone()),
        json: cli.json,
        output: cli.output.clone(),
        concurrency: cli.concurrent.unwrap_or(config.fuzzer.concurrency),
        delay: delay_from_secs(cli.delay.unwrap_or(config.fuzzer.delay_secs))?,
        encoding: cli.encode.unwrap_or(config.fuzzer.encoding),
        policy: StatusPolicy::parse(cli.match_status.as_deref(), cli.filter_status.as_deref())?,
        engine: http.engine_config(),
        cores: cli
            .cores
            .as_deref()
            .map(CoreSpec::parse)
            .unwrap_or(config.cluster.cores),
        flush_interval: std::time::Duration::from_millis(config.cluster.flush_interval_ms),
        shutdown_grace: std::time::Duration::from_millis(config.cluster.shutdown_grace_ms),
        output_buffer: config.cluster.output_buffer,
    };

    options.validate()?;
    Ok(options)
}

/// Initialize the logging system
///
/// Stdout carries results, so console logs go to stderr.
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        // File-based logging with rotation
        let file_appender = if log_path.contains('/') || log_path.contains('\\') {
            let path = std::path::Path::new(log_path);
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("fuzz404.log");
            RollingFileAppender::new(Rotation::DAILY, dir, filename)
        } else {
            let log_dir = Config::data_dir()
                .map(|d| d.join("logs"))
                .unwrap_or_else(|_| PathBuf::from("."));
            std::fs::create_dir_all(&log_dir).ok();
            RollingFileAppender::new(Rotation::DAILY, log_dir, log_path)
        };

        if cli.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);
            subscriber.with(file_layer).try_init()?;
        } else {
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).try_init()?;
        }
    } else if cli.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

/// One-line error plus hint; full detail for unexpected errors in debug mode
fn report(err: &anyhow::Error) {
    let debug = std::env::var_os(ENV_DEBUG).is_some();

    match err.downcast_ref::<FuzzError>() {
        Some(fuzz) => {
            eprintln!("error: {}", fuzz);
            if let Some(hint) = fuzz.user_hint() {
                eprintln!("hint: {}", hint);
            }
            if debug && fuzz.category() == ErrorCategory::Unknown {
                eprintln!("{:#?}", fuzz);
            }
        }
        None => {
            eprintln!("error: {:#}", err);
            if debug {
                eprintln!("{:?}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options(args: &[&str]) -> Result<RunOptions> {
        let cli = Cli::try_parse_from(std::iter::once("fuzz404").chain(args.iter().copied()))?;
        build_options(&cli, &Config::default())
    }

    #[test]
    fn test_cli_flags_override_config() {
        let opts = options(&[
            "https://example.com/FUZZ",
            "-w",
            "/tmp/words.txt",
            "-X",
            "post",
            "-H",
            "A: 1",
            "-H",
            "B: 2",
            "-t",
            "20",
            "--timeout",
            "1500",
            "-k",
            "--delay",
            "0.5",
            "-m",
            "200,301",
            "-f",
            "all",
            "-c",
            "2",
            "--encode",
            "smart",
        ])
        .unwrap();

        assert_eq!(opts.method, "post");
        assert_eq!(opts.headers, vec!["A: 1", "B: 2"]);
        assert_eq!(opts.concurrency, 20);
        assert_eq!(opts.engine.timeout, Some(Duration::from_millis(1500)));
        assert!(opts.engine.insecure);
        assert_eq!(opts.delay, Duration::from_millis(500));
        assert_eq!(opts.policy.matches, vec![200, 301]);
        assert!(opts.policy.filters.is_empty());
        assert_eq!(opts.cores, CoreSpec::Count(2));
        assert_eq!(opts.encoding, EncodingPolicy::Smart);
        assert_eq!(opts.keyword, "FUZZ");
    }

    #[test]
    fn test_defaults_from_config() {
        let opts = options(&["example.com/FUZZ", "-w", "words.txt:WORD"]).unwrap();
        assert_eq!(opts.concurrency, 500);
        assert_eq!(opts.engine.timeout, None);
        assert_eq!(opts.delay, Duration::ZERO);
        assert_eq!(opts.cores, CoreSpec::Half);
        assert_eq!(opts.keyword, "WORD");
        assert_eq!(opts.wordlist, PathBuf::from("words.txt"));
        assert_eq!(opts.flush_interval, Duration::from_millis(250));
        assert!(opts.default_headers.is_empty());
        assert!(opts.engine.tcp_keepalive);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(options(&["example.com/FUZZ", "-w", "w.txt", "-t", "0"]).is_err());
        assert!(options(&["example.com/FUZZ", "-w", "w.txt", "-m", "abc"]).is_err());
        assert!(options(&["example.com/FUZZ", "-w", "w.txt", "--max-body-size", "0"]).is_err());
        // Wordlist is mandatory
        assert!(Cli::try_parse_from(["fuzz404", "example.com/FUZZ"]).is_err());
    }

    #[test]
    fn test_generate_config_needs_no_target() {
        let cli = Cli::try_parse_from(["fuzz404", "--generate-config"]).unwrap();
        assert!(cli.generate_config);
        assert!(cli.url.is_none());
    }
}
