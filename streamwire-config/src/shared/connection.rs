use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Default timeout applied when opening the transport to the remote resource.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Connection parameters for a stream-oriented remote resource.
///
/// The same shape serves SQL servers, HTTP endpoints and pub/sub brokers: the
/// transport only needs an address, while credentials are handed to the wire
/// codec during startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// Hostname or IP address of the remote resource.
    pub host: String,
    /// Port the remote resource listens on.
    pub port: u16,
    /// Optional user name for protocols that authenticate.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password. Sensitive and redacted in debug output.
    #[serde(default)]
    pub password: Option<SerializableSecretString>,
    /// Milliseconds to wait for the transport to be established.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl ConnectionConfig {
    /// Creates a config for `host:port` with no credentials and the default timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    /// Returns the connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validates the [`ConnectionConfig`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }

        if self.port == 0 {
            return Err(ValidationError::ZeroPort);
        }

        if self.connect_timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout("connect_timeout_ms"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_host() {
        let config = ConnectionConfig::new("  ", 4222);
        assert_eq!(config.validate(), Err(ValidationError::EmptyHost));
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config = ConnectionConfig::new("localhost", 0);
        assert_eq!(config.validate(), Err(ValidationError::ZeroPort));
    }

    #[test]
    fn test_deserialize_applies_default_timeout() {
        let config = parse_yaml("host: db.internal\nport: 5432\n");
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert!(config.password.is_none());
        assert!(config.validate().is_ok());
    }

    fn parse_yaml(yaml: &str) -> ConnectionConfig {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
