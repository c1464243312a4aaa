//! Configuration module for pipe-sieve
//!
//! The sieve is driven by a candidate range `[low, high)` and the choice of
//! stage backend. Values come from three layers, later layers winning:
//!
//! 1. Built-in defaults ([`DEFAULT_LOW`], [`DEFAULT_HIGH`], process backend)
//! 2. An optional TOML file (`--config FILE`)
//! 3. Command line overrides
//!
//! # Example
//!
//! ```toml
//! low = 2
//! high = 100
//! backend = "thread"
//! ```

use crate::error::{Result, SieveError};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// Default first candidate
pub const DEFAULT_LOW: i32 = 2;

/// Default exclusive upper bound
pub const DEFAULT_HIGH: i32 = 35;

/// Where pipeline stages run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One operating system process per stage, connected by pipes
    #[default]
    Process,
    /// One thread per stage, connected by in-memory byte pipes
    Thread,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Process => "process",
            Backend::Thread => "thread",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(Backend::Process),
            "thread" => Ok(Backend::Thread),
            other => Err(SieveError::Config(format!("Unknown backend '{}'", other))),
        }
    }
}

/// Sieve configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SieveConfig {
    /// First candidate fed into the pipeline
    #[serde(default = "default_low")]
    pub low: i32,

    /// Exclusive upper bound of the candidate range
    #[serde(default = "default_high")]
    pub high: i32,

    /// Stage backend
    #[serde(default)]
    pub backend: Backend,
}

fn default_low() -> i32 {
    DEFAULT_LOW
}

fn default_high() -> i32 {
    DEFAULT_HIGH
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
            backend: Backend::default(),
        }
    }
}

impl SieveConfig {
    /// Config with the default range lowered to end at `high`
    pub fn with_bound(high: i32) -> Self {
        Self {
            high,
            ..Self::default()
        }
    }

    /// Load a config file, filling in defaults for missing keys
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SieveError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml(&content)
            .map_err(|e| e.with_context(format!("Config file {:?}", path)))
    }

    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SieveError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the range can be sieved.
    ///
    /// Zero and one are not valid candidates: one divides everything and zero
    /// cannot be a divisor. An empty range (`high <= low`) is allowed.
    pub fn validate(&self) -> Result<()> {
        if self.low < DEFAULT_LOW {
            return Err(SieveError::Config(format!(
                "low bound must be at least {}, got {}",
                DEFAULT_LOW, self.low
            )));
        }
        Ok(())
    }

    /// The candidate values fed into the first stage
    pub fn candidates(&self) -> Range<i32> {
        self.low..self.high.max(self.low)
    }

    /// Ceiling handed to every stage
    pub fn ceiling(&self) -> i32 {
        self.high
    }
}
