//! Client configuration management.
//!
//! Holds the backend URL and the timeouts/retry budget used by the network
//! layer. Configuration is stored at `~/.config/roadsense/config.json`;
//! missing fields fall back to defaults and `ROADSENSE_API_URL` overrides the
//! backend URL.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "roadsense";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_url`
const API_URL_ENV: &str = "ROADSENSE_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:3000/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    /// Per-attempt timeout for API calls.
    pub request_timeout_secs: u64,
    /// Retries after the first attempt on network failure.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Timeout for the quick connectivity probe.
    pub probe_timeout_secs: u64,
    /// Timeout for the wake-up probe; covers backend cold starts.
    pub wake_timeout_secs: u64,
    pub health_path: String,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 10,
            max_retries: 3,
            retry_delay_ms: 1000,
            probe_timeout_secs: 5,
            wake_timeout_secs: 30,
            health_path: "/health".to_string(),
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_url = url;
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Backend URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn health_url(&self) -> String {
        format!("{}/{}", self.base_url(), self.health_path.trim_start_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn wake_timeout(&self) -> Duration {
        Duration::from_secs(self.wake_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.wake_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_url": "https://api.example.com/"}"#).expect("config");
        assert_eq!(config.base_url(), "https://api.example.com");
        assert_eq!(config.health_url(), "https://api.example.com/health");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_explicit_cache_dir() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/roadsense-test")),
            ..Config::default()
        };
        assert_eq!(
            config.cache_dir().expect("cache dir"),
            PathBuf::from("/tmp/roadsense-test")
        );
    }
}
