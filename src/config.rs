use crate::error::{AppError, Result};
use crate::lock::RetryPolicy;
use crate::models::{DEFAULT_LEASE_TIME, DEFAULT_WAIT_TIME};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
    pub application: ApplicationSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Tuning for the coordinator and its Redis-backed collaborators.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    /// Prepended to lock names and cache keys when non-empty.
    pub key_prefix: String,
    pub cache_ttl_secs: u64,
    pub default_wait_ms: u64,
    /// Must exceed the worst-case handler duration; leases are never renewed.
    pub default_lease_ms: u64,
    pub lock_initial_backoff_ms: u64,
    pub lock_max_backoff_ms: u64,
    pub retention_days: i64,
    pub retention_interval_secs: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            cache_ttl_secs: 3600, // 60 minutes
            default_wait_ms: DEFAULT_WAIT_TIME.as_millis() as u64,
            default_lease_ms: DEFAULT_LEASE_TIME.as_millis() as u64,
            lock_initial_backoff_ms: 10,
            lock_max_backoff_ms: 200,
            retention_days: 30,
            retention_interval_secs: 3600,
        }
    }
}

impl IdempotencySettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.default_wait_ms)
    }

    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.default_lease_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.lock_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.lock_max_backoff_ms),
        }
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    pub fn key_prefix(&self) -> Option<&str> {
        if self.key_prefix.is_empty() {
            None
        } else {
            Some(&self.key_prefix)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 {
            return Err(AppError::Validation("cache_ttl_secs must be positive".to_string()));
        }
        if self.default_lease_ms == 0 {
            return Err(AppError::Validation("default_lease_ms must be positive".to_string()));
        }
        if self.lock_initial_backoff_ms == 0 || self.lock_max_backoff_ms < self.lock_initial_backoff_ms {
            return Err(AppError::Validation(
                "lock backoff must satisfy 0 < initial <= max".to_string(),
            ));
        }
        if self.retention_interval_secs == 0 {
            return Err(AppError::Validation("retention_interval_secs must be positive".to_string()));
        }
        if self.retention_days <= 0 {
            return Err(AppError::Validation("retention_days must be positive".to_string()));
        }
        Ok(())
    }
}

impl Settings {
    pub fn new() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.idempotency.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_idempotency_settings() {
        let settings = IdempotencySettings::default();
        assert_eq!(settings.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(settings.default_wait(), Duration::from_secs(15));
        assert_eq!(settings.default_lease(), Duration::from_secs(5));
        assert_eq!(settings.key_prefix(), None);
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_lease() {
        let settings = IdempotencySettings {
            default_lease_ms: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let settings = IdempotencySettings {
            lock_initial_backoff_ms: 500,
            lock_max_backoff_ms: 100,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_from_toml() {
        let toml = r#"
            [database]
            url = "postgres://localhost/idem"
            pool_size = 4

            [redis]
            url = "redis://localhost:6379"

            [idempotency]
            key_prefix = "idem"
            cache_ttl_secs = 120

            [application]
            log_level = "debug"
        "#;

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.database.pool_size, 4);
        assert_eq!(settings.idempotency.key_prefix(), Some("idem"));
        assert_eq!(settings.idempotency.cache_ttl_secs, 120);
        assert_eq!(settings.idempotency.default_lease_ms, 5_000);
        assert_eq!(settings.application.log_format, "pretty");
    }
}
