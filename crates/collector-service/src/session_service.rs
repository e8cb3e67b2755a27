//! Session service trait definition.

use crate::dto::{SessionStatusResponse, UploadSessionRequest};
use async_trait::async_trait;
use collector_core::{CollectorResult, Interface};

/// Host-facing session operations.
#[async_trait]
pub trait SessionService: Interface + Send + Sync {
    /// Stores uploaded cookies and returns the resulting status.
    async fn upload_session(&self, request: UploadSessionRequest) -> CollectorResult<SessionStatusResponse>;

    /// Reports what is stored for an account.
    async fn get_session_status(&self, account_id: &str) -> CollectorResult<SessionStatusResponse>;

    /// Lists stored sessions, newest first.
    async fn list_sessions(&self) -> CollectorResult<Vec<SessionStatusResponse>>;

    /// Removes the session for an account.
    async fn delete_session(&self, account_id: &str) -> CollectorResult<bool>;

    /// Finds the stored session implied by an Instagram profile URL.
    async fn session_for_url(&self, url: &str) -> CollectorResult<Option<SessionStatusResponse>>;
}
