//! Optional config file supplying defaults for the CLI.
//!
//! Read from `<config dir>/swiftdl/config.toml` when present; every field
//! falls back to the compiled default, so a partial file (or none at all)
//! is fine. Command-line flags override whatever was loaded.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use swiftdl::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use swiftdl::{DB_FILE_NAME, DEFAULT_CHUNK_COUNT, DEFAULT_WORKER_COUNT, UPDATE_PERIOD};

/// Defaults for new downloads and the manager, as read from config.toml.
///
/// Unknown keys are rejected so a typo fails loudly instead of being
/// silently ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Database file path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Chunk count for new downloads.
    #[serde(default = "default_chunk_count")]
    pub chunk_count: u32,

    /// Worker pool size for new downloads.
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,

    /// Minimum delay between chunk-progress events, in milliseconds.
    #[serde(default = "default_update_period_ms")]
    pub update_period_ms: u64,

    /// HTTP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// HTTP read timeout in seconds.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Config {
    /// Loads the config file, or returns the defaults when there is none.
    pub fn load() -> Result<Self> {
        let Some(path) = Self::config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        debug!(path = %path.display(), "loading config file");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("swiftdl").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            chunk_count: default_chunk_count(),
            worker_count: default_worker_count(),
            update_period_ms: default_update_period_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

// Default value functions, shared between serde and Default.
fn default_db_path() -> PathBuf {
    PathBuf::from(DB_FILE_NAME)
}
fn default_chunk_count() -> u32 {
    DEFAULT_CHUNK_COUNT
}
fn default_worker_count() -> u32 {
    DEFAULT_WORKER_COUNT
}
fn default_update_period_ms() -> u64 {
    u64::try_from(UPDATE_PERIOD.as_millis()).unwrap_or(200)
}
fn default_connect_timeout_secs() -> u64 {
    CONNECT_TIMEOUT_SECS
}
fn default_read_timeout_secs() -> u64 {
    READ_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/var/lib/swiftdl/downloads.db"
            chunk_count = 16
            worker_count = 8
            update_period_ms = 100
            connect_timeout_secs = 10
            read_timeout_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(
            config.db_path,
            PathBuf::from("/var/lib/swiftdl/downloads.db")
        );
        assert_eq!(config.chunk_count, 16);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.update_period_ms, 100);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.read_timeout_secs, 120);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str("chunk_count = 2").unwrap();
        assert_eq!(config.chunk_count, 2);
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(config.db_path, PathBuf::from(DB_FILE_NAME));
        assert_eq!(config.read_timeout_secs, READ_TIMEOUT_SECS);
    }

    #[test]
    fn test_empty_config_equals_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.chunk_count, defaults.chunk_count);
        assert_eq!(parsed.update_period_ms, defaults.update_period_ms);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("bandwidth_limit = 100");
        assert!(result.is_err(), "typos must fail loudly");
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("chunk_count = \"four\"");
        assert!(result.is_err());
    }
}
