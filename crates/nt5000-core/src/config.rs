//! Tool configuration stored as JSON
//!
//! Every field is optional in the file; missing ones take their defaults.
//! Command-line flags override what the file says.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::protocol::{ClockSetScheme, ConnectionConfig, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Default seconds between polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Accepted poll interval range in seconds
pub const POLL_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=100;

/// Errors loading or saving the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Cannot read config {path}: {source}")]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The file could not be written
    #[error("Cannot write config {path}: {source}")]
    Write {
        /// Config file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The file is not valid config JSON
    #[error("Invalid config {path}: {source}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Where the JSON went wrong
        source: serde_json::Error,
    },
}

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port of the inverter
    pub port: Option<String>,

    /// Baud rate
    pub baud_rate: u32,

    /// Response timeout in milliseconds
    pub timeout_ms: u64,

    /// Seconds between polls in display mode
    pub poll_interval_secs: u64,

    /// Clock-set numbering of the device generation
    pub clock_scheme: ClockSetScheme,

    /// Talk to the built-in emulator instead of a port
    pub emulate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            clock_scheme: ClockSetScheme::default(),
            emulate: false,
        }
    }
}

impl Config {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Write as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Poll interval, falling back to the default when out of range
    pub fn poll_interval(&self) -> Duration {
        let secs = if POLL_INTERVAL_RANGE.contains(&self.poll_interval_secs) {
            self.poll_interval_secs
        } else {
            warn!(
                "poll interval {}s outside {}..={}, using {}s",
                self.poll_interval_secs,
                POLL_INTERVAL_RANGE.start(),
                POLL_INTERVAL_RANGE.end(),
                DEFAULT_POLL_INTERVAL_SECS
            );
            DEFAULT_POLL_INTERVAL_SECS
        };
        Duration::from_secs(secs)
    }

    /// Connection settings for the dispatcher
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            port_name: self.port.clone().unwrap_or_default(),
            baud_rate: self.baud_rate,
            timeout_ms: self.timeout_ms,
            clock_scheme: self.clock_scheme,
        }
    }
}
