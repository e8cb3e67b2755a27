//! # Collector Security
//!
//! Safekeeping for long-lived third-party authentication material:
//! browser-exported cookies are parsed, sealed with AES-256-GCM, and stored
//! per account. A configured key is mandatory; there is no plaintext mode.

pub mod error;
pub mod vault;

pub use error::{VaultError, VaultResult};
pub use vault::*;
