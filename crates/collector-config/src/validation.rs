//! Configuration validation.
//!
//! Every problem is collected and reported together.

use crate::{AppConfig, DelayWindowConfig, MAX_CONCURRENT_JOBS, MIN_CONCURRENT_JOBS};
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// Concurrency ceiling outside the supported range.
    ConcurrencyOutOfRange { value: usize, min: usize, max: usize },
    /// Delay window with max below min.
    InvalidDelayWindow { key: String, min_ms: u64, max_ms: u64 },
    /// Backoff multiplier that would shrink delays.
    InvalidBackoffBase { value: f64 },
    /// Database URL is empty or not a SQLite URL.
    InvalidDatabaseUrl { message: String },
    /// Pool with no connections.
    EmptyPool,
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String },
    /// Log level is invalid.
    InvalidLogLevel { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConcurrencyOutOfRange { value, min, max } => {
                write!(f, "scheduler.max_concurrent must be between {min} and {max}, got {value}")
            }
            Self::InvalidDelayWindow { key, min_ms, max_ms } => {
                write!(
                    f,
                    "Delay window for '{key}' has max ({max_ms} ms) below min ({min_ms} ms)"
                )
            }
            Self::InvalidBackoffBase { value } => {
                write!(f, "rate_gate.backoff_base must be at least 1.0, got {value}")
            }
            Self::InvalidDatabaseUrl { message } => write!(f, "Invalid database URL: {message}"),
            Self::EmptyPool => write!(f, "database.max_connections must be at least 1"),
            Self::NonPositiveTimeout { name } => write!(f, "Timeout '{name}' must be positive"),
            Self::InvalidLogLevel { value } => {
                write!(
                    f,
                    "Invalid log level: '{value}' (valid: trace, debug, info, warn, error)"
                )
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_scheduler(config, &mut errors);
        Self::validate_rate_gate(config, &mut errors);
        Self::validate_database(config, &mut errors);

        if !Self::VALID_LOG_LEVELS.contains(&config.observability.log_level.to_lowercase().as_str()) {
            errors.push(ConfigValidationError::InvalidLogLevel {
                value: config.observability.log_level.clone(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_scheduler(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let scheduler = &config.scheduler;
        if !(MIN_CONCURRENT_JOBS..=MAX_CONCURRENT_JOBS).contains(&scheduler.max_concurrent) {
            errors.push(ConfigValidationError::ConcurrencyOutOfRange {
                value: scheduler.max_concurrent,
                min: MIN_CONCURRENT_JOBS,
                max: MAX_CONCURRENT_JOBS,
            });
        }
        if scheduler.shutdown_grace_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveTimeout {
                name: "scheduler.shutdown_grace_secs".to_string(),
            });
        }
        if scheduler.cancel_timeout_secs > 0 && scheduler.watchdog_interval_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveTimeout {
                name: "scheduler.watchdog_interval_secs".to_string(),
            });
        }
    }

    fn validate_rate_gate(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let gate = &config.rate_gate;
        let windows = std::iter::once(("default", gate.default_window()))
            .chain(gate.platforms.iter().map(|(k, w)| (k.as_str(), *w)));

        for (key, DelayWindowConfig { min_delay_ms, max_delay_ms }) in windows {
            if max_delay_ms < min_delay_ms {
                errors.push(ConfigValidationError::InvalidDelayWindow {
                    key: key.to_string(),
                    min_ms: min_delay_ms,
                    max_ms: max_delay_ms,
                });
            }
        }

        if !(gate.backoff_base >= 1.0) {
            errors.push(ConfigValidationError::InvalidBackoffBase {
                value: gate.backoff_base,
            });
        }
    }

    fn validate_database(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let database = &config.database;
        if database.url.is_empty() {
            errors.push(ConfigValidationError::InvalidDatabaseUrl {
                message: "URL is empty".to_string(),
            });
        } else {
            match Url::parse(&database.url) {
                Ok(url) if url.scheme() == "sqlite" => {}
                Ok(url) => errors.push(ConfigValidationError::InvalidDatabaseUrl {
                    message: format!("unsupported scheme '{}'", url.scheme()),
                }),
                Err(e) => errors.push(ConfigValidationError::InvalidDatabaseUrl {
                    message: e.to_string(),
                }),
            }
        }
        if database.max_connections == 0 {
            errors.push(ConfigValidationError::EmptyPool);
        }
    }
}
