use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

/// Remote real-time database connection settings.
///
/// All three values must be present and non-placeholder for sync to be
/// considered configured; anything less means local-only operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Database endpoint, e.g. "https://stride-default-rtdb.firebaseio.com"
    pub database_url: String,
    /// Project identifier (becomes the top-level path segment)
    pub project_id: String,
    /// Access key appended to every request
    pub api_key: String,
}

impl RemoteConfig {
    pub fn configured(&self) -> bool {
        !is_placeholder(&self.database_url)
            && !is_placeholder(&self.project_id)
            && !is_placeholder(&self.api_key)
    }
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty() || value == "undefined" || value.starts_with("YOUR_")
}

/// Local storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory override (empty = platform default)
    pub data_dir: Option<String>,
}

/// Sync behavior tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts per push before giving up
    pub push_attempts: u32,
    /// First retry delay; doubles per attempt
    pub retry_base_ms: u64,
    /// Pause before reopening a dropped subscription stream
    pub reconnect_delay_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_attempts: 3,
            retry_base_ms: 250,
            reconnect_delay_secs: 5,
        }
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("stride");

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .context("Failed to read config file")?;

            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            Ok(config)
        } else {
            // Create default config and save it
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(!config.remote.configured());
        assert!(config.storage.data_dir.is_none());
        assert_eq!(config.sync.push_attempts, 3);
        assert_eq!(config.sync.retry_base_ms, 250);
        assert_eq!(config.sync.reconnect_delay_secs, 5);
    }

    #[test]
    fn test_placeholder_credentials_are_not_configured() {
        let mut remote = RemoteConfig {
            database_url: "https://db.example.com".to_string(),
            project_id: "stride-prod".to_string(),
            api_key: "k3y".to_string(),
        };
        assert!(remote.configured());

        remote.api_key = "undefined".to_string();
        assert!(!remote.configured());

        remote.api_key = "YOUR_API_KEY".to_string();
        assert!(!remote.configured());

        remote.api_key = String::new();
        assert!(!remote.configured());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[remote]
database_url = "https://db.example.com"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        // Custom value
        assert_eq!(config.remote.database_url, "https://db.example.com");
        // Default values
        assert!(config.remote.project_id.is_empty());
        assert_eq!(config.sync.push_attempts, 3);
        // One credential alone is not a configured remote
        assert!(!config.remote.configured());
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[remote]
database_url = "https://db.example.com"
project_id = "stride-prod"
api_key = "k3y"

[storage]
data_dir = "/custom/path"

[sync]
push_attempts = 5
retry_base_ms = 100
reconnect_delay_secs = 10
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert!(config.remote.configured());
        assert_eq!(config.storage.data_dir, Some("/custom/path".to_string()));
        assert_eq!(config.sync.push_attempts, 5);
        assert_eq!(config.sync.retry_base_ms, 100);
        assert_eq!(config.sync.reconnect_delay_secs, 10);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(config.sync.push_attempts, deserialized.sync.push_attempts);
        assert_eq!(config.remote.database_url, deserialized.remote.database_url);
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid [[ toml";
        let result: Result<Config, _> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }
}
