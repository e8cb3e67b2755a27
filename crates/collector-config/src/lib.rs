//! # Collector Config
//!
//! Layered configuration for Collector: TOML files under `config/`, a `.env`
//! file, and `COLLECTOR__*` environment variables, validated before use.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
