use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the metadata extraction worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Address the HTTP control surface binds to
    pub listen_addr: String,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Seconds before a probe is abandoned (0 disables the limit)
    pub probe_timeout_secs: u64,
    /// Directory holding cached probe results, one file per content hash
    pub cache_dir: Option<PathBuf>,
    /// Base URL of the metadata store
    pub store_url: Option<String>,
    /// Default URL outcome callbacks are posted to
    pub callback_url: Option<String>,
    /// Timeout for store and callback HTTP requests
    pub http_timeout_secs: u64,
    /// Existing-metadata key carrying the content hash
    pub hash_key: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl WorkerConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            ffprobe_bin: PathBuf::from("ffprobe"),
            probe_timeout_secs: 120,
            cache_dir: None,
            store_url: None,
            callback_url: None,
            http_timeout_secs: 30,
            hash_key: "contentHash".to_string(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Probe timeout, if one is enforced
    pub fn probe_timeout(&self) -> Option<Duration> {
        (self.probe_timeout_secs > 0).then(|| Duration::from_secs(self.probe_timeout_secs))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Apply a runtime patch from the `/configure` endpoint
    pub fn apply(&mut self, patch: ConfigurePatch) {
        if let Some(url) = patch.store_url {
            self.store_url = Some(url);
        }
        if let Some(url) = patch.callback_url {
            self.callback_url = Some(url);
        }
        if let Some(dir) = patch.cache_dir {
            self.cache_dir = Some(dir);
        }
        if let Some(secs) = patch.probe_timeout_secs {
            self.probe_timeout_secs = secs;
        }
    }
}

/// Partial configuration accepted at runtime
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurePatch {
    pub store_url: Option<String>,
    pub callback_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub probe_timeout_secs: Option<u64>,
}
