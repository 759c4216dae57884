//! Store configuration.
//!
//! [`StoreConfig`] can be built in code or loaded from TOML. Every field has
//! a default, so an empty file is a valid configuration:
//!
//! ```toml
//! kv_url = "http://localhost:8500"
//! kv_prefix = "sso"
//! multikey = true
//! chunk_threshold = 409600
//! request_timeout_secs = 30
//! ```

use crate::storage::chunk::{ChunkPolicy, DEFAULT_CHUNK_THRESHOLD};
use crate::{DEFAULT_KV_PREFIX, DEFAULT_KV_URL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Connection and chunking settings for a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Base URL of the Consul agent
    pub kv_url: String,

    /// Namespace root; entries live under `<kv_prefix>/v2/`
    pub kv_prefix: String,

    /// Split values larger than `chunk_threshold` instead of rejecting them
    pub multikey: bool,

    /// Bytes per physical entry
    pub chunk_threshold: usize,

    /// Per-request transport timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kv_url: DEFAULT_KV_URL.to_string(),
            kv_prefix: DEFAULT_KV_PREFIX.to_string(),
            multikey: true,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            request_timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks the settings for values the store cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kv_url.trim().is_empty() {
            return Err(ConfigError::Invalid("kv_url must not be empty".into()));
        }
        if self.kv_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("kv_prefix must not be empty".into()));
        }
        if self.chunk_threshold == 0 {
            return Err(ConfigError::Invalid(
                "chunk_threshold must be greater than 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Transport timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The chunking policy these settings describe.
    pub fn chunk_policy(&self) -> ChunkPolicy {
        ChunkPolicy::new(self.chunk_threshold, self.multikey)
    }
}
