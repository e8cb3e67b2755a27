//! # Collector Server Library
//!
//! Wiring for the Collector job server: opens the stores, builds the
//! scheduler and services, and runs startup recovery and graceful shutdown.

pub mod app;
pub mod startup;

pub use app::{AppBuilder, Application, StartupReport};
