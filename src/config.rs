//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use crate::handlers::RetryPolicy;
use crate::jobs::JobSchedulerConfig;
use crate::outbox::OutboxProcessorConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Environment (development, production)
    pub environment: String,

    /// Log output: "text" or "json"
    pub log_format: String,

    /// Seconds between outbox polling cycles
    pub outbox_poll_interval_secs: u64,

    /// Messages claimed per cycle
    pub outbox_batch_size: usize,

    /// Failed deliveries before a message is parked
    pub outbox_max_retries: i32,

    /// Seconds before a Processing claim can be taken over
    pub outbox_claim_lease_secs: u64,

    /// Seconds to wait before the first outbox cycle
    pub outbox_startup_delay_secs: u64,

    /// Days to keep Completed outbox messages
    pub outbox_retention_days: u64,

    /// Attempts per ledger operation on version conflicts
    pub ledger_max_concurrency_retries: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
        if log_format != "text" && log_format != "json" {
            return Err(ConfigError::InvalidValue("LOG_FORMAT"));
        }

        Ok(Self {
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10, 1..=1_000)?,
            environment,
            log_format,
            outbox_poll_interval_secs: parse_env("OUTBOX_POLL_INTERVAL_SECS", 10, 1..=3_600)?,
            outbox_batch_size: parse_env("OUTBOX_BATCH_SIZE", 50, 1..=10_000)?,
            outbox_max_retries: parse_env("OUTBOX_MAX_RETRIES", 3, 1..=100)?,
            outbox_claim_lease_secs: parse_env("OUTBOX_CLAIM_LEASE_SECS", 300, 1..=86_400)?,
            outbox_startup_delay_secs: parse_env("OUTBOX_STARTUP_DELAY_SECS", 5, 0..=3_600)?,
            outbox_retention_days: parse_env("OUTBOX_RETENTION_DAYS", 7, 1..=3_650)?,
            ledger_max_concurrency_retries: parse_env(
                "LEDGER_MAX_CONCURRENCY_RETRIES",
                5,
                1..=100,
            )?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }

    pub fn outbox_processor(&self) -> OutboxProcessorConfig {
        OutboxProcessorConfig {
            poll_interval: Duration::from_secs(self.outbox_poll_interval_secs),
            batch_size: self.outbox_batch_size,
            max_retries: self.outbox_max_retries,
            claim_lease: Duration::from_secs(self.outbox_claim_lease_secs),
            startup_delay: Duration::from_secs(self.outbox_startup_delay_secs),
        }
    }

    pub fn job_scheduler(&self) -> JobSchedulerConfig {
        JobSchedulerConfig {
            completed_retention: Duration::from_secs(self.outbox_retention_days * 24 * 3600),
            ..JobSchedulerConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.ledger_max_concurrency_retries)
    }
}

/// Read `name`, falling back to `default` when unset.
///
/// Unparsable values and values outside `range` are rejected.
fn parse_env<T>(name: &'static str, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd,
{
    let value = match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name))?,
        Err(_) => default,
    };

    if !range.contains(&value) {
        return Err(ConfigError::OutOfRange(name));
    }
    Ok(value)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("Value out of range for environment variable: {0}")]
    OutOfRange(&'static str),
}
