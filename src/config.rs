//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::cache::{default_cache_dir, expand_home};

/// Downloader configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Hub base URL, without trailing slash
    pub endpoint: String,
    /// Cache root; `~` is expanded against the home directory
    pub cache_dir: PathBuf,
    /// Branch whose commit is recorded under `refs/`
    pub revision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Minimum spacing between progress events
    pub progress_interval_ms: u64,
    /// Hash completed LFS blobs and compare against their sha256 content key
    pub verify_checksums: bool,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            cache_dir: default_cache_dir(),
            revision: default_revision(),
            token: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            progress_interval_ms: default_progress_interval(),
            verify_checksums: true,
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(endpoint) = std::env::var("HF_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            config.cache_dir = PathBuf::from(cache_dir);
        }
        if let Ok(token) = std::env::var("HF_TOKEN")
            && !token.trim().is_empty()
        {
            config.token = Some(token.trim().to_string());
        }
        if let Ok(revision) = std::env::var("HF_CACHE_FETCH_REVISION") {
            config.revision = revision;
        }

        config.endpoint = config.endpoint.trim_end_matches('/').to_string();
        config.cache_dir = expand_home(&config.cache_dir);

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            anyhow::bail!("Endpoint must be an http(s) URL (got {})", self.endpoint);
        }

        if self.revision.is_empty() {
            anyhow::bail!("Revision cannot be empty");
        }
        if self.revision.contains("..") || self.revision.starts_with('/') {
            anyhow::bail!("Revision '{}' is not a valid ref name", self.revision);
        }

        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than zero");
        }

        if self.cache_dir.as_os_str().is_empty() {
            anyhow::bail!("Cache directory cannot be empty");
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

// Default functions
fn default_endpoint() -> String {
    "https://huggingface.co".to_string()
}
fn default_revision() -> String {
    "main".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    60
}
fn default_progress_interval() -> u64 {
    80
}
fn default_user_agent() -> String {
    format!("hf-cache-fetch/{}", env!("CARGO_PKG_VERSION"))
}
