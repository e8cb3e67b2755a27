//! Session-related DTOs.

use chrono::{DateTime, Utc};
use collector_core::validation::rules;
use collector_security::SessionSummary;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to upload browser-exported cookies.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UploadSessionRequest {
    /// Derived from the `ds_user_id` cookie when omitted.
    #[validate(length(max = 128, message = "Account id is too long"))]
    pub account_id: Option<String>,

    /// Netscape `cookies.txt` content.
    #[validate(custom(function = "rules::not_blank"))]
    pub cookies: String,
}

/// Stored session state for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub account_id: String,
    pub exists: bool,
    pub fresh: bool,
    pub loaded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cookie_count: usize,
    pub encryption_enabled: bool,
}

impl SessionStatusResponse {
    /// Status for an account with nothing usable stored.
    #[must_use]
    pub fn missing(account_id: impl Into<String>, encryption_enabled: bool) -> Self {
        Self {
            account_id: account_id.into(),
            exists: false,
            fresh: false,
            loaded_at: None,
            expires_at: None,
            cookie_count: 0,
            encryption_enabled,
        }
    }
}

impl From<SessionSummary> for SessionStatusResponse {
    fn from(summary: SessionSummary) -> Self {
        Self {
            account_id: summary.account_id,
            exists: true,
            fresh: summary.fresh,
            loaded_at: Some(summary.loaded_at),
            expires_at: Some(summary.expires_at),
            cookie_count: summary.cookie_count,
            encryption_enabled: true,
        }
    }
}
