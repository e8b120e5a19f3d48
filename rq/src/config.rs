//! Ratequeue configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::SchedulerConfig;

/// Main ratequeue configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Admission and queue settings
    pub scheduler: SchedulerConfig,

    /// HTTP executor settings
    pub http: HttpConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the credential environment variables are set.
    pub fn validate(&self) -> Result<()> {
        for var in [&self.http.key_env, &self.http.token_env] {
            if std::env::var(var).is_err() {
                return Err(eyre::eyre!("API credential not found. Set the {} environment variable.", var));
            }
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .ratequeue.yml
        let local_config = PathBuf::from(".ratequeue.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/ratequeue/ratequeue.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ratequeue").join("ratequeue.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// HTTP executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Environment variable containing the API key
    #[serde(rename = "key-env")]
    pub key_env: String,

    /// Environment variable containing the API token
    #[serde(rename = "token-env")]
    pub token_env: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.trello.com/1".to_string(),
            timeout_ms: 30_000,
            key_env: "TRELLO_KEY".to_string(),
            token_env: "TRELLO_TOKEN".to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Read the key and token from their environment variables
    pub fn credentials(&self) -> Result<(String, String)> {
        let key = std::env::var(&self.key_env).context(format!("{} is not set", self.key_env))?;
        let token = std::env::var(&self.token_env).context(format!("{} is not set", self.token_env))?;
        Ok((key, token))
    }
}
