//! Engine configuration
//!
//! Values come from built-in defaults, then an optional TOML file, then CLI
//! flags (applied by the caller).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on the worker pool size
pub const MAX_WORKERS: usize = 256;

/// Upper bound on a single keyserver fetch, in seconds
pub const MAX_KEY_FETCH_TIMEOUT_SECONDS: u64 = 300;

/// How missing verification material is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Missing checksums, missing signatures and unresolvable keys are fatal
    #[default]
    Strict,
    /// Missing material is a warning; mismatches are still fatal
    Lenient,
}

/// Whether a run stops at the first fatal outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Verify every artifact and report all failures
    #[default]
    Batch,
    /// Cancel remaining work after the first fatal outcome
    FailFast,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub mode: Mode,

    pub failure_mode: FailureMode,

    /// Worker pool size (default: available parallelism)
    pub workers: Option<usize>,

    /// Bound on each keyserver fetch (default: 10)
    pub key_fetch_timeout_seconds: u64,

    /// Directory holding the local key cache; no cache when unset
    pub key_cache_dir: Option<PathBuf>,

    /// Directory of exported public keys used as the keyserver; no remote
    /// key resolution when unset
    pub keyserver_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Strict,
            failure_mode: FailureMode::Batch,
            workers: None,
            key_fetch_timeout_seconds: 10,
            key_cache_dir: None,
            keyserver_dir: None,
        }
    }
}

/// Engine configuration errors
#[derive(Debug, thiserror::Error)]
pub enum EngineConfigError {
    #[error("workers must be in [1, 256], got {value}")]
    WorkersOutOfBounds { value: usize },

    #[error("key_fetch_timeout_seconds must be in (0, 300], got {value}")]
    FetchTimeoutOutOfBounds { value: u64 },

    #[error("cannot read config {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("TOML parse error: {0}")]
    Parse(String),
}

impl EngineConfig {
    /// Parse and validate a TOML config
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineConfigError> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| EngineConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, EngineConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| EngineConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if let Some(workers) = self.workers {
            if workers == 0 || workers > MAX_WORKERS {
                return Err(EngineConfigError::WorkersOutOfBounds { value: workers });
            }
        }

        if self.key_fetch_timeout_seconds == 0
            || self.key_fetch_timeout_seconds > MAX_KEY_FETCH_TIMEOUT_SECONDS
        {
            return Err(EngineConfigError::FetchTimeoutOutOfBounds {
                value: self.key_fetch_timeout_seconds,
            });
        }

        Ok(())
    }

    /// Effective worker pool size
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(MAX_WORKERS)
        })
    }

    pub fn key_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.key_fetch_timeout_seconds)
    }

    pub fn is_fail_fast(&self) -> bool {
        self.failure_mode == FailureMode::FailFast
    }
}
