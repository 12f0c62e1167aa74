use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Connection pool settings.
///
/// `max_idle_ms` is only a default for explicit cleanup calls. The pool never
/// evicts idle connections on its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections the pool keeps, idle or in use.
    pub max_size: usize,
    /// How long an acquire may wait for a free connection. Waits forever when unset.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
    /// How long creating a new connection may take. Unbounded when unset.
    #[serde(default)]
    pub create_timeout_ms: Option<u64>,
    /// Idle age after which a connection is eligible for cleanup.
    pub max_idle_ms: u64,
}

impl PoolConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn create_timeout(&self) -> Option<Duration> {
        self.create_timeout_ms.map(Duration::from_millis)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    /// Validates pool settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::ZeroPoolSize);
        }

        if self.wait_timeout_ms == Some(0) {
            return Err(ValidationError::ZeroTimeout("wait_timeout_ms"));
        }

        if self.create_timeout_ms == Some(0) {
            return Err(ValidationError::ZeroTimeout("create_timeout_ms"));
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            wait_timeout_ms: Some(30_000),
            create_timeout_ms: Some(10_000),
            max_idle_ms: 300_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_idle(), Duration::from_secs(300));
    }

    #[test]
    fn test_zero_size_rejected() {
        let config = PoolConfig {
            max_size: 0,
            ..PoolConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::ZeroPoolSize));
    }

    #[test]
    fn test_zero_wait_timeout_rejected() {
        let config = PoolConfig {
            wait_timeout_ms: Some(0),
            ..PoolConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroTimeout("wait_timeout_ms"))
        );
    }
}
