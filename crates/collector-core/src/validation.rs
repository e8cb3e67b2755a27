//! Request validation helpers.

use crate::CollectorError;
use validator::{Validate, ValidationErrors};

/// Extension trait for validation.
pub trait ValidateExt: Validate {
    /// Validates the struct and returns a `CollectorError` on failure.
    fn validate_request(&self) -> Result<(), CollectorError> {
        self.validate().map_err(validation_errors_to_collector_error)
    }
}

impl<T: Validate> ValidateExt for T {}

/// Flattens `validator::ValidationErrors` into one `Validation` error.
///
/// Fields are reported in name order so messages are stable.
#[must_use]
pub fn validation_errors_to_collector_error(errors: ValidationErrors) -> CollectorError {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let message = fields
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| {
                let detail = error
                    .message
                    .as_ref()
                    .map_or_else(|| error.code.to_string(), ToString::to_string);
                format!("{field}: {detail}")
            })
        })
        .collect::<Vec<_>>()
        .join("; ");

    CollectorError::Validation(message)
}

/// Common validation rules.
pub mod rules {
    use validator::ValidationError;

    /// Rejects strings that are empty after trimming.
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("not_blank").with_message("must not be blank".into()));
        }
        Ok(())
    }
}
