//! SyncDeck configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::CacheConfig;
use crate::channel::{ChannelConfig, parse_endpoint};
use crate::coordinator::CoordinatorConfig;
use crate::queue::QueueConfig;
use crate::services::ServicesConfig;

/// Environment variable overriding `channel.endpoint`
pub const ENV_PUSH_ENDPOINT: &str = "SYNCDECK_PUSH_ENDPOINT";

/// Environment variable overriding `services.base-url`
pub const ENV_SERVICES_URL: &str = "SYNCDECK_SERVICES_URL";

/// Environment variable overriding `queue.max-concurrent`
pub const ENV_MAX_CONCURRENT: &str = "SYNCDECK_MAX_CONCURRENT";

/// Main SyncDeck configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when `--log-level` is not given
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Expiring cache TTLs and sweeping
    pub cache: CacheConfig,

    /// Request queue bound and fetch timeout
    pub queue: QueueConfig,

    /// Push channel endpoint and reconnection policy
    pub channel: ChannelConfig,

    /// Coordinator behavior and channel relays
    pub coordinator: CoordinatorConfig,

    /// Remote fetch services
    pub services: ServicesConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrent == 0 {
            return Err(eyre::eyre!("queue.max-concurrent must be at least 1"));
        }
        if self.channel.base_delay_ms == 0 {
            return Err(eyre::eyre!("channel.base-delay-ms must be greater than 0"));
        }
        if self.channel.endpoint.trim().is_empty() {
            return Err(eyre::eyre!(
                "channel.endpoint is empty. Set it in the config file or via {}.",
                ENV_PUSH_ENDPOINT
            ));
        }
        parse_endpoint(&self.channel.endpoint).context("channel.endpoint is not a valid push endpoint")?;
        if self.services.base_url.trim().is_empty() {
            return Err(eyre::eyre!("services.base-url is empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain, then apply environment overrides
    ///
    /// Explicit path > `./.syncdeck.yml` > `<config_dir>/syncdeck/syncdeck.yml` > defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .syncdeck.yml
        let local_config = PathBuf::from(".syncdeck.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/syncdeck/syncdeck.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("syncdeck").join("syncdeck.yml"))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply `SYNCDECK_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_PUSH_ENDPOINT) {
            tracing::debug!(%endpoint, "Config: push endpoint from environment");
            self.channel.endpoint = endpoint;
        }
        if let Some(url) = lookup(ENV_SERVICES_URL) {
            tracing::debug!(%url, "Config: services URL from environment");
            self.services.base_url = url;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT) {
            self.queue.max_concurrent = raw
                .trim()
                .parse()
                .context(format!("{} must be a positive integer, got {:?}", ENV_MAX_CONCURRENT, raw))?;
        }
        Ok(())
    }

    /// Log level from whichever config file the chain would pick, if it sets one
    ///
    /// Read before logging is installed, so failures fall back to `None` silently.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".syncdeck.yml")];
                paths.extend(Self::user_config_path());
                paths
            }
        };

        candidates
            .into_iter()
            .find(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DataClass;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.queue.max_concurrent, 5);
        assert_eq!(config.channel.base_delay_ms, 1000);
        assert_eq!(config.channel.max_attempts, 5);
        assert_eq!(config.cache.ttl_for(DataClass::Quotes), Duration::from_millis(1_800_000));
        assert!(config.log_level.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

cache:
  default-ttl-ms: 5000
  ttl-ms:
    fleet: 10000

queue:
  max-concurrent: 2
  fetch-timeout-ms: 1500

channel:
  endpoint: tcp://push.example.com:9000
  base-delay-ms: 500
  max-attempts: 8
  max-delay-ms: 20000

coordinator:
  auto-connect: false
  relays:
    - event: status-update
      invalidate: ["truck-*"]

services:
  base-url: https://api.example.com
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.cache.ttl_for(DataClass::Fleet), Duration::from_secs(10));
        assert_eq!(config.cache.ttl_for(DataClass::Map), Duration::from_secs(5));
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.channel.endpoint, "tcp://push.example.com:9000");
        assert_eq!(config.channel.max_delay_ms, Some(20_000));
        assert!(!config.coordinator.auto_connect);
        assert_eq!(config.coordinator.relays.len(), 1);
        assert_eq!(config.services.base_url, "https://api.example.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("queue:\n  max-concurrent: 9\n").unwrap();

        assert_eq!(config.queue.max_concurrent, 9);
        assert_eq!(config.queue.fetch_timeout_ms, 30_000);
        assert_eq!(config.channel.endpoint, "tcp://127.0.0.1:7878");
        assert_eq!(config.coordinator.relays.len(), 3);
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                (ENV_PUSH_ENDPOINT, "tcp://10.0.0.5:7000"),
                (ENV_SERVICES_URL, "http://10.0.0.5/api"),
                (ENV_MAX_CONCURRENT, "3"),
            ]))
            .unwrap();

        assert_eq!(config.channel.endpoint, "tcp://10.0.0.5:7000");
        assert_eq!(config.services.base_url, "http://10.0.0.5/api");
        assert_eq!(config.queue.max_concurrent, 3);

        let mut config = Config::default();
        assert!(config.apply_overrides(env(&[(ENV_MAX_CONCURRENT, "many")])).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.queue.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.channel.base_delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.channel.endpoint = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.channel.endpoint = "ws://push:1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path_and_log_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncdeck.yml");
        fs::write(&path, "log-level: trace\nqueue:\n  max-concurrent: 4\n").unwrap();

        let config = Config::load_file_chain(Some(&path)).unwrap();
        assert_eq!(config.queue.max_concurrent, 4);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("trace"));

        let missing = dir.path().join("missing.yml");
        assert!(Config::load_file_chain(Some(&missing)).is_err());
        assert!(Config::load_log_level(Some(&missing)).is_none());
    }
}
