//! Runtime configuration for the fetcher, embedder and search defaults.
//!
//! Resolution order: built-in defaults, then `config.toml` (platform config
//! dir or `--config`), then `KBVEC_*` environment variables. The result is
//! passed explicitly to whatever needs it. Only this module reads the
//! environment; `search` and `sources` take everything as arguments.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::search::hash_embedder::DEFAULT_DIMENSION;
use crate::search::vector_store::{PARALLEL_THRESHOLD, StoreOptions};
use crate::sources::fetch::FetchConfig;

pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway used to resolve `ipfs://` URIs.
    pub ipfs_gateway: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    /// Record count at which search goes parallel; 0 disables.
    pub parallel_threshold: usize,
    pub default_k: usize,
    /// Dimension of the built-in hash embedder used for `--text` queries.
    pub hash_dimension: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: concat!("kbvec/", env!("CARGO_PKG_VERSION")).to_string(),
            parallel_threshold: PARALLEL_THRESHOLD,
            default_k: DEFAULT_K,
            hash_dimension: DEFAULT_DIMENSION,
        }
    }
}

impl Config {
    /// Load from `path` (or the default location when it exists) and apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(gateway) = dotenvy::var("KBVEC_IPFS_GATEWAY") {
            self.ipfs_gateway = gateway;
        }
        if let Ok(value) = dotenvy::var("KBVEC_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = value
                .trim()
                .parse()
                .with_context(|| format!("KBVEC_HTTP_TIMEOUT_SECS={value:?} is not a number"))?;
        }
        if let Ok(value) = dotenvy::var("KBVEC_PARALLEL_THRESHOLD") {
            self.parallel_threshold = value
                .trim()
                .parse()
                .with_context(|| format!("KBVEC_PARALLEL_THRESHOLD={value:?} is not a number"))?;
        }
        if let Ok(value) = dotenvy::var("KBVEC_DEFAULT_K") {
            self.default_k = value
                .trim()
                .parse()
                .with_context(|| format!("KBVEC_DEFAULT_K={value:?} is not a number"))?;
        }
        Ok(())
    }

    pub fn fetch_config(&self, base_dir: Option<PathBuf>) -> FetchConfig {
        FetchConfig {
            ipfs_gateway: self.ipfs_gateway.clone(),
            timeout_secs: self.http_timeout_secs,
            user_agent: self.user_agent.clone(),
            base_dir,
        }
    }

    pub fn store_options(&self, renormalize: bool) -> StoreOptions {
        StoreOptions {
            renormalize,
            parallel_threshold: (self.parallel_threshold > 0).then_some(self.parallel_threshold),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "kbvec", "kbvec")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
