//! Service implementations.
//!
//! Trait definitions live in the parent module (e.g. `job_service.rs`).

pub mod job_service_impl;
pub mod session_service_impl;

pub use job_service_impl::JobServiceImpl;
pub use session_service_impl::SessionServiceImpl;
