//! # Collector Resilience
//!
//! Pacing primitives used by scrapers between their own remote calls.

pub mod rate_gate;

pub use rate_gate::*;
