//! Application configuration
//!
//! Config file handling and the merged per-run options shared by the
//! primary and its workers.

mod config;

pub use config::{delay_from_secs, Config, RunOptions};
