//! Application configuration structures.

use collector_core::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Job record database.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Worker pool and lifecycle settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Request pacing between remote calls.
    #[serde(default)]
    pub rate_gate: RateGateConfig,

    /// Session material storage.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Logging configuration.
    #[serde(default)]
    pub observability: LoggingConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, production, test).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "collector".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Apply embedded migrations on startup.
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_database_url() -> String {
    "sqlite://data/collector.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    /// Returns the connection timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Worker pool and lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global ceiling on concurrently running jobs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Grace period given to in-flight jobs on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Maximum retry generations for one original submission.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Jobs stuck in `cancelling` longer than this are failed. Zero disables.
    #[serde(default = "default_cancel_timeout")]
    pub cancel_timeout_secs: u64,
    /// How often the cancellation watchdog runs.
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
}

pub const MIN_CONCURRENT_JOBS: usize = 1;
pub const MAX_CONCURRENT_JOBS: usize = 10;

fn default_max_concurrent() -> usize {
    2
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_cancel_timeout() -> u64 {
    300
}

fn default_watchdog_interval() -> u64 {
    15
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            shutdown_grace_secs: default_shutdown_grace(),
            max_retries: default_max_retries(),
            cancel_timeout_secs: default_cancel_timeout(),
            watchdog_interval_secs: default_watchdog_interval(),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Returns `None` when the watchdog is disabled.
    #[must_use]
    pub const fn cancel_timeout(&self) -> Option<Duration> {
        if self.cancel_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cancel_timeout_secs))
        }
    }

    #[must_use]
    pub const fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

/// Delay window for one rate-gated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayWindowConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl DelayWindowConfig {
    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Request pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateGateConfig {
    /// Lower bound of the default randomized delay.
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    /// Upper bound of the default randomized delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Multiplier applied per backoff level after a penalty.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    /// Highest backoff level a key can reach.
    #[serde(default = "default_max_backoff_level")]
    pub max_backoff_level: u32,
    /// Per-key windows, e.g. `instagram`.
    #[serde(default)]
    pub platforms: HashMap<String, DelayWindowConfig>,
}

fn default_min_delay() -> u64 {
    5_000
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_max_backoff_level() -> u32 {
    4
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            backoff_base: default_backoff_base(),
            max_backoff_level: default_max_backoff_level(),
            platforms: HashMap::new(),
        }
    }
}

impl RateGateConfig {
    /// Default window used for keys without an override.
    #[must_use]
    pub const fn default_window(&self) -> DelayWindowConfig {
        DelayWindowConfig {
            min_delay_ms: self.min_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// Session vault configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding one `.session` file per account.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    /// Symmetric key material. Session persistence is disabled without it.
    #[serde(default)]
    pub encryption_key: Option<SecretString>,
    /// Sessions older than this are reported as stale.
    #[serde(default = "default_session_max_age")]
    pub max_age_secs: u64,
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("data/sessions")
}

fn default_session_max_age() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            encryption_key: None,
            max_age_secs: default_session_max_age(),
        }
    }
}

impl VaultConfig {
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Returns the configured key, treating a blank value as absent.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.encryption_key
            .as_ref()
            .map(SecretString::expose)
            .filter(|k| !k.trim().is_empty())
    }
}
