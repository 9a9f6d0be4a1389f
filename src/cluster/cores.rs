//! Worker count resolution

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Requested number of worker processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum CoreSpec {
    /// Half of the available cores, at least one
    #[default]
    Half,
    /// Every available core
    All,
    /// One worker
    Single,
    /// A fixed count, capped at the available cores
    Count(usize),
}

impl CoreSpec {
    /// Parse leniently: anything unrecognised means `half`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "half" => CoreSpec::Half,
            "all" => CoreSpec::All,
            "single" => CoreSpec::Single,
            other => match other.parse::<usize>() {
                Ok(n) if n > 0 => CoreSpec::Count(n),
                _ => CoreSpec::Half,
            },
        }
    }

    /// Worker count for a machine with `available` cores
    pub fn resolve(&self, available: usize) -> usize {
        let available = available.max(1);
        match self {
            CoreSpec::Half => (available / 2).max(1),
            CoreSpec::All => available,
            CoreSpec::Single => 1,
            CoreSpec::Count(n) => (*n).min(available),
        }
    }
}

impl FromStr for CoreSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CoreSpec::parse(s))
    }
}

impl From<String> for CoreSpec {
    fn from(value: String) -> Self {
        CoreSpec::parse(&value)
    }
}

impl From<CoreSpec> for String {
    fn from(value: CoreSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CoreSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreSpec::Half => f.write_str("half"),
            CoreSpec::All => f.write_str("all"),
            CoreSpec::Single => f.write_str("single"),
            CoreSpec::Count(n) => write!(f, "{}", n),
        }
    }
}

/// Cores visible to this process
pub fn available_cores() -> usize {
    num_cpus::get().max(1)
}
