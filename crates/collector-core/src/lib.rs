//! # Collector Core
//!
//! Foundational types shared by every Collector crate: the unified error
//! taxonomy, typed ids, result aliases, request validation, and the logging
//! bootstrap.

pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;
pub mod validation;

pub use error::*;
pub use id::*;
pub use result::*;
pub use telemetry::{init_logging, LoggingConfig};
pub use validation::ValidateExt;

// Re-export shaku so component traits share one marker supertrait
pub use shaku::Interface;
