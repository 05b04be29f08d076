use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Batching server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Backend rows per batch round before the group's multiplier is applied.
    pub max_batch_size: usize,

    /// Interval between batch rounds.
    #[serde(rename = "batch_timeout_ms", with = "millis")]
    pub batch_timeout: Duration,

    /// Time with no connected clients after which the server exits.
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Duration,

    /// Input slot whose left padding is stripped from the backend's output rows.
    pub sequence_slot: String,

    /// Fill value used when aligning sequences.
    ///
    /// Integer slots are padded with the same value, so it must be a whole number.
    pub pad_value: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            batch_timeout: Duration::from_millis(200),
            idle_timeout: Duration::from_secs(20),
            sequence_slot: "decoder_input_ids".into(),
            pad_value: 0.0,
        }
    }
}

/// Client settings, including the settings of any server it has to spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Attempts per `generate` call before giving up.
    pub max_retries: usize,

    /// How often to probe for a freshly spawned server.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// How long a spawned server may take to start listening.
    #[serde(rename = "startup_timeout_ms", with = "millis")]
    pub startup_timeout: Duration,

    pub server: ServerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            poll_interval: Duration::from_millis(100),
            startup_timeout: Duration::from_secs(120),
            server: ServerConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|v| v.parse().ok())
}

impl ServerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Override fields from `TEPPAN_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("TEPPAN_MAX_BATCH_SIZE") {
            self.max_batch_size = v;
        }
        if let Some(v) = env_parse("TEPPAN_BATCH_TIMEOUT_MS") {
            self.batch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("TEPPAN_IDLE_TIMEOUT_MS") {
            self.idle_timeout = Duration::from_millis(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be positive".into()));
        }
        if self.batch_timeout.is_zero() {
            return Err(ConfigError::Invalid("batch_timeout_ms must be positive".into()));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("idle_timeout_ms must be positive".into()));
        }
        if !self.pad_value.is_finite() || self.pad_value.fract() != 0.0 {
            return Err(ConfigError::Invalid(format!(
                "pad_value must be a whole number, got {}",
                self.pad_value
            )));
        }
        Ok(())
    }
}

impl ClientConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("TEPPAN_MAX_RETRIES") {
            self.max_retries = v;
        }
        self.server.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        self.server.validate()
    }
}

/// Durations as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_batch_size, 8);
        assert_eq!(config.batch_timeout, Duration::from_millis(200));
        assert_eq!(config.idle_timeout, Duration::from_secs(20));
        assert_eq!(ClientConfig::default().max_retries, 3);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ServerConfig::from_toml(
            r#"
            max_batch_size = 16
            batch_timeout_ms = 50
            sequence_slot = "tokens"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_batch_size, 16);
        assert_eq!(config.batch_timeout, Duration::from_millis(50));
        assert_eq!(config.sequence_slot, "tokens");
        assert_eq!(config.idle_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_parse_client_with_server_section() {
        let config = ClientConfig::from_toml(
            r#"
            max_retries = 5
            [server]
            idle_timeout_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.server.idle_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let err = ServerConfig::from_toml("max_batch_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_fractional_pad() {
        let err = ServerConfig::from_toml("pad_value = 0.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = ServerConfig::from_toml("pad_value = -1.0").unwrap();
        assert_eq!(config.pad_value, -1.0);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ServerConfig::from_toml("max_batch_size = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
