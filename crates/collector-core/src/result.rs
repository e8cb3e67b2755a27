//! Result type aliases for Collector.

use crate::CollectorError;

/// A specialized `Result` type for Collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;
