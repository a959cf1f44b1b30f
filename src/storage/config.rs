use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::notify::ChannelSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid config value: {0} must be greater than zero")]
    InvalidValue(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub ai: AiConfig,
    pub notifications: NotificationsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub base_url: String,
    pub push_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiConfig {
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    pub topic: String,
    pub capacity: usize,
    pub reconnect_delay_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub database: PathBuf,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let notifications = &self.notifications;
        if self.ai.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue("ai.timeout_seconds"));
        }
        if notifications.capacity == 0 {
            return Err(ConfigError::InvalidValue("notifications.capacity"));
        }
        if notifications.reconnect_delay_seconds == 0 {
            return Err(ConfigError::InvalidValue("notifications.reconnect_delay_seconds"));
        }
        if notifications.heartbeat_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue("notifications.heartbeat_interval_seconds"));
        }
        Ok(())
    }

    pub fn load_or_create() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agenda-sync")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.ai.timeout_seconds)
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            topic: self.notifications.topic.clone(),
            capacity: self.notifications.capacity,
            reconnect_delay: Duration::from_secs(self.notifications.reconnect_delay_seconds),
            heartbeat_interval: Duration::from_secs(self.notifications.heartbeat_interval_seconds),
            storage_key: self.notifications.storage_key.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://localhost:8080".to_string(),
                push_address: "localhost:8085".to_string(),
            },
            ai: AiConfig {
                timeout_seconds: 120,
            },
            notifications: NotificationsConfig {
                topic: "/topic/notifications".to_string(),
                capacity: 20,
                reconnect_delay_seconds: 5,
                heartbeat_interval_seconds: 4,
                storage_key: "agenda-notifications".to_string(),
            },
            storage: StorageConfig {
                database: Self::config_dir().join("state.db"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_waits_two_minutes_for_extraction() {
        let config = Config::default();
        assert_eq!(config.extraction_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn default_channel_settings_match_builtin_defaults() {
        let settings = Config::default().channel_settings();
        let builtin = ChannelSettings::default();

        assert_eq!(settings.topic, builtin.topic);
        assert_eq!(settings.capacity, builtin.capacity);
        assert_eq!(settings.reconnect_delay, builtin.reconnect_delay);
        assert_eq!(settings.heartbeat_interval, builtin.heartbeat_interval);
        assert_eq!(settings.storage_key, builtin.storage_key);
    }

    #[test]
    fn parse_valid_toml_config() {
        let toml_content = r#"
            [server]
            base_url = "https://agenda.example.com"
            push_address = "agenda.example.com:9000"

            [ai]
            timeout_seconds = 30

            [notifications]
            topic = "/topic/notifications/alice"
            capacity = 50
            reconnect_delay_seconds = 10
            heartbeat_interval_seconds = 8
            storage_key = "alice-notifications"

            [storage]
            database = "/tmp/agenda.db"
        "#;

        let config = Config::from_toml(toml_content).unwrap();

        assert_eq!(config.server.base_url, "https://agenda.example.com");
        assert_eq!(config.ai.timeout_seconds, 30);
        assert_eq!(config.channel_settings().capacity, 50);
        assert_eq!(config.storage.database, PathBuf::from("/tmp/agenda.db"));
    }

    #[test]
    fn serialized_default_parses_back() {
        let config = Config::default();

        let content = toml::to_string_pretty(&config).unwrap();

        assert_eq!(Config::from_toml(&content).unwrap(), config);
    }

    #[test]
    fn zero_durations_and_capacity_are_rejected() {
        let cases = [
            ("heartbeat_interval_seconds = 4", "heartbeat_interval_seconds = 0", "notifications.heartbeat_interval_seconds"),
            ("reconnect_delay_seconds = 5", "reconnect_delay_seconds = 0", "notifications.reconnect_delay_seconds"),
            ("capacity = 20", "capacity = 0", "notifications.capacity"),
            ("timeout_seconds = 120", "timeout_seconds = 0", "ai.timeout_seconds"),
        ];
        let valid = toml::to_string_pretty(&Config::default()).unwrap();

        for (from, to, field) in cases {
            assert!(valid.contains(from), "default config should contain {}", from);
            let content = valid.replace(from, to);

            let result = Config::from_toml(&content);

            assert!(
                matches!(result, Err(ConfigError::InvalidValue(name)) if name == field),
                "{} should be rejected",
                field
            );
        }
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid toml";
        let result = Config::from_toml(invalid_toml);
        assert!(result.is_err());
    }
}
