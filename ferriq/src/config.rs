//! The service configuration document.
//!
//! One RON document configures the whole broker. Every field has a
//! default, so a missing document (or an empty one) yields a working
//! development setup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use ferriq_queue::{EngineSettings, QueueTuning};

/// Configuration file locations, in precedence order:
/// 1. the `FERRIQ_CONFIG` environment variable
/// 2. `./ferriq.config.ron`
/// 3. `/etc/ferriq/ferriq.config.ron`
const DEFAULT_PATHS: [&str; 2] = ["./ferriq.config.ron", "/etc/ferriq/ferriq.config.ron"];

/// Failure to locate or parse the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("invalid listen interface {interface}: {source}")]
    Interface {
        interface: String,
        source: std::net::AddrParseError,
    },

    #[error("FERRIQ_CONFIG points to a non-existent file: {0}")]
    MissingOverride(PathBuf),
}

/// Top-level broker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// `host:port` the wire protocol listens on.
    pub interface: String,
    /// Directory the embedded store lives in; created when absent.
    pub database_path: PathBuf,
    /// Milliseconds between write-behind flushes.
    pub db_flush_interval: u64,
    /// In-memory page cache of the embedded store, in bytes.
    pub db_buffer_size: u64,
    /// Milliseconds between per-queue timeout sweeps.
    pub update_interval: u64,
    /// Tracking-heap entries consumed per sweep.
    pub timeout_check_batch_size: i64,
    /// Priority-queue defaults and caps.
    pub pqueue: QueueTuning,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            interface: "127.0.0.1:9033".to_string(),
            database_path: PathBuf::from("./ferriq-data"),
            db_flush_interval: 100,
            db_buffer_size: 10 * 1024 * 1024,
            update_interval: 100,
            timeout_check_batch_size: 1000,
            pqueue: QueueTuning::default(),
        }
    }
}

impl BrokerConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    /// On a syntactically invalid document.
    pub fn from_str(document: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(document)?)
    }

    /// Read and parse the document at `path`.
    ///
    /// # Errors
    /// On I/O or parse failures.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&document)
    }

    /// Locate the configuration document, if any.
    ///
    /// # Errors
    /// When `FERRIQ_CONFIG` is set but names a missing file; silence
    /// would hide a misconfigured deployment.
    pub fn find_file() -> Result<Option<PathBuf>, ConfigError> {
        if let Ok(overridden) = std::env::var("FERRIQ_CONFIG") {
            let path = PathBuf::from(overridden);
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(ConfigError::MissingOverride(path));
        }
        Ok(DEFAULT_PATHS
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists()))
    }

    /// The listening address.
    ///
    /// # Errors
    /// When `interface` is not a valid socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.interface
            .parse()
            .map_err(|source| ConfigError::Interface {
                interface: self.interface.clone(),
                source,
            })
    }

    /// The engine-facing slice of this document.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            tuning: self.pqueue.clone(),
            update_interval: Duration::from_millis(self.update_interval),
            timeout_check_batch_size: self.timeout_check_batch_size,
        }
    }

    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.db_flush_interval)
    }
}
