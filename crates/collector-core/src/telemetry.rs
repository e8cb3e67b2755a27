//! Logging bootstrap.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! human-readable or JSON formatter. `RUST_LOG` always wins over the
//! configured level.

use serde::{Deserialize, Serialize};

#[cfg(feature = "telemetry")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::CollectorResult;

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit one JSON object per event instead of pretty text.
    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl LoggingConfig {
    /// Builds the filter directive, scoping the configured level to our crates.
    #[must_use]
    pub fn directive(&self) -> String {
        format!("{level},collector={level},sqlx=warn", level = self.log_level)
    }
}

/// Initialize the global tracing subscriber.
///
/// Calling this twice returns an error instead of panicking, which keeps
/// tests that share a process from tripping over each other.
#[cfg(feature = "telemetry")]
pub fn init_logging(config: &LoggingConfig) -> CollectorResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directive()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| crate::CollectorError::Internal(format!("Failed to initialize logging: {e}")))?;

    tracing::debug!(
        log_level = %config.log_level,
        json = config.json_logs,
        "Logging initialized"
    );

    Ok(())
}

/// Placeholder for when the telemetry feature is disabled.
#[cfg(not(feature = "telemetry"))]
pub fn init_logging(_config: &LoggingConfig) -> CollectorResult<()> {
    Ok(())
}
