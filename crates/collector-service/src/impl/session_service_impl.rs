//! Session service implementation.

use crate::dto::{SessionStatusResponse, UploadSessionRequest};
use crate::session_service::SessionService;
use async_trait::async_trait;
use chrono::Utc;
use collector_core::{CollectorError, CollectorResult, ValidateExt};
use collector_jobs::Platform;
use collector_security::{parse_netscape, sanitize_account_id, SessionBundle, SessionVault};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Cookie holding the numeric Instagram account id.
pub const ACCOUNT_COOKIE: &str = "ds_user_id";

/// Session service backed by the encrypted vault.
pub struct SessionServiceImpl {
    vault: Arc<SessionVault>,
}

impl SessionServiceImpl {
    /// Creates a new session service.
    pub fn new(vault: Arc<SessionVault>) -> Self {
        Self { vault }
    }

    fn status_of(&self, bundle: &SessionBundle) -> SessionStatusResponse {
        SessionStatusResponse {
            account_id: bundle.account_id().to_string(),
            exists: true,
            fresh: self.vault.is_fresh_now(bundle),
            loaded_at: Some(bundle.loaded_at()),
            expires_at: Some(bundle.expires_at(self.vault.max_age())),
            cookie_count: bundle.cookies().len(),
            encryption_enabled: true,
        }
    }
}

/// Account to store an upload under: explicit id, then the account
/// cookie, then a timestamped fallback.
fn derive_account_id(request: &UploadSessionRequest) -> String {
    if let Some(account) = request.account_id.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        return account.to_string();
    }
    parse_netscape(&request.cookies)
        .into_iter()
        .find(|cookie| cookie.name == ACCOUNT_COOKIE && !cookie.value.trim().is_empty())
        .map_or_else(
            || format!("session_{}", Utc::now().format("%Y%m%d_%H%M%S")),
            |cookie| cookie.value,
        )
}

/// Profile name of an `instagram.com/<name>` URL.
fn instagram_profile(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if Platform::detect(&url) != Some(Platform::Instagram) {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let profile = segments.next()?;
    segments.next().is_none().then(|| profile.to_string())
}

#[async_trait]
impl SessionService for SessionServiceImpl {
    async fn upload_session(&self, request: UploadSessionRequest) -> CollectorResult<SessionStatusResponse> {
        request.validate_request()?;
        if !self.vault.is_enabled() {
            return Err(CollectorError::MissingEncryptionKey);
        }

        let account_id = derive_account_id(&request);
        debug!("Uploading session for account: {}", account_id);

        let bundle = self.vault.store(&account_id, &request.cookies).await?;

        info!("Session uploaded: {}", bundle.account_id());
        Ok(self.status_of(&bundle))
    }

    async fn get_session_status(&self, account_id: &str) -> CollectorResult<SessionStatusResponse> {
        if !self.vault.is_enabled() {
            return Ok(SessionStatusResponse::missing(account_id, false));
        }

        let key = sanitize_account_id(account_id)?;
        Ok(match self.vault.load(&key).await? {
            Some(bundle) => self.status_of(&bundle),
            None => SessionStatusResponse::missing(key, true),
        })
    }

    async fn list_sessions(&self) -> CollectorResult<Vec<SessionStatusResponse>> {
        if !self.vault.is_enabled() {
            return Ok(Vec::new());
        }
        let sessions = self.vault.list().await?;
        Ok(sessions.into_iter().map(SessionStatusResponse::from).collect())
    }

    async fn delete_session(&self, account_id: &str) -> CollectorResult<bool> {
        Ok(self.vault.delete(account_id).await?)
    }

    async fn session_for_url(&self, url: &str) -> CollectorResult<Option<SessionStatusResponse>> {
        if !self.vault.is_enabled() {
            return Ok(None);
        }
        let Some(profile) = instagram_profile(url) else {
            return Ok(None);
        };
        let Ok(key) = sanitize_account_id(&profile) else {
            return Ok(None);
        };

        let bundle = self.vault.load(&key).await?;
        Ok(bundle.map(|bundle| self.status_of(&bundle)))
    }
}
