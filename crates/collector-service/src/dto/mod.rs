//! Data Transfer Objects (DTOs).

mod job_dto;
mod session_dto;

pub use job_dto::*;
pub use session_dto::*;
