//! # Collector Service
//!
//! Host-facing operations over the job scheduler and the session vault.
//! The HTTP/HTML layer owns presentation and calls into these traits.

pub mod dto;
pub mod r#impl;
pub mod job_service;
pub mod session_service;

pub use dto::*;
pub use job_service::*;
pub use r#impl::{JobServiceImpl, SessionServiceImpl};
pub use session_service::*;
