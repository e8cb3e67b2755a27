//! Session vault error types.

use collector_core::CollectorError;
use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors raised by the session vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No symmetric key configured. Blocks every session read and write.
    #[error("Session encryption key is not configured")]
    MissingEncryptionKey,

    /// Account identifier is empty once sanitized.
    #[error("Invalid account identifier: {0:?}")]
    InvalidAccountId(String),

    /// Uploaded text contained no usable cookie lines.
    #[error("No cookies could be parsed from the uploaded text")]
    InvalidCookies,

    /// Stored bytes failed authentication or are malformed.
    #[error("Session for {account} could not be decrypted")]
    DecryptionFailure { account: String },

    /// Sealing the bundle failed.
    #[error("Session encryption failed")]
    EncryptionFailure,

    /// Underlying byte store failed.
    #[error("Session storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Bundle payload could not be (de)serialized.
    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// Decryption failures degrade to "no session" instead of erroring.
    #[must_use]
    pub const fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::DecryptionFailure { .. })
    }
}

impl From<VaultError> for CollectorError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::MissingEncryptionKey => Self::MissingEncryptionKey,
            VaultError::DecryptionFailure { account } => Self::DecryptionFailure(account),
            VaultError::InvalidAccountId(_) | VaultError::InvalidCookies => {
                Self::Validation(err.to_string())
            }
            VaultError::EncryptionFailure => Self::Internal(err.to_string()),
            VaultError::Storage(e) => Self::Internal(format!("Session storage error: {e}")),
            VaultError::Serialization(e) => Self::Internal(format!("Session serialization error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_keeps_taxonomy() {
        let err: CollectorError = VaultError::MissingEncryptionKey.into();
        assert_eq!(err.error_code(), "MISSING_ENCRYPTION_KEY");

        let err: CollectorError = VaultError::InvalidCookies.into();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err: CollectorError = VaultError::DecryptionFailure {
            account: "alice".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "DECRYPTION_FAILURE");
    }
}
