//! Encrypted per-account session storage.

mod cipher;
mod cookies;
mod store;

pub use cipher::SessionCipher;
pub use cookies::{parse_netscape, Cookie};
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};

use crate::{VaultError, VaultResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use collector_config::VaultConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_ACCOUNT_ID_LEN: usize = 128;

/// Normalizes an account identifier into a storage key.
///
/// Lowercases, drops whitespace and every character outside
/// `[a-z0-9._-]`, and strips leading/trailing dots. Fails if nothing is left.
pub fn sanitize_account_id(raw: &str) -> VaultResult<String> {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches('.');

    if cleaned.is_empty() || cleaned.len() > MAX_ACCOUNT_ID_LEN {
        return Err(VaultError::InvalidAccountId(raw.to_string()));
    }
    Ok(cleaned.to_string())
}

/// Decrypted authentication material for one account.
///
/// Only ever held transiently in memory.
#[derive(Clone)]
pub struct SessionBundle {
    account_id: String,
    loaded_at: DateTime<Utc>,
    raw_cookies: String,
    cookies: Vec<Cookie>,
}

impl SessionBundle {
    fn new(account_id: String, loaded_at: DateTime<Utc>, raw_cookies: String) -> VaultResult<Self> {
        let cookies = parse_netscape(&raw_cookies);
        if cookies.is_empty() {
            return Err(VaultError::InvalidCookies);
        }
        Ok(Self {
            account_id,
            loaded_at,
            raw_cookies,
            cookies,
        })
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// The cookie text exactly as uploaded.
    #[must_use]
    pub fn raw_cookies(&self) -> &str {
        &self.raw_cookies
    }

    #[must_use]
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Cookies that would be sent to `host`.
    pub fn cookies_for<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a Cookie> + 'a {
        self.cookies.iter().filter(move |c| c.matches_domain(host))
    }

    /// Time since the bundle was uploaded.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.loaded_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// When the bundle turns stale under `max_age`.
    #[must_use]
    pub fn expires_at(&self, max_age: Duration) -> DateTime<Utc> {
        ChronoDuration::from_std(max_age)
            .ok()
            .and_then(|window| self.loaded_at.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Debug for SessionBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBundle")
            .field("account_id", &self.account_id)
            .field("loaded_at", &self.loaded_at)
            .field("cookies", &self.cookies.len())
            .finish_non_exhaustive()
    }
}

/// Plaintext layout sealed into the store.
#[derive(Serialize, Deserialize)]
struct SealedPayload {
    account_id: String,
    loaded_at: DateTime<Utc>,
    raw_cookies: String,
}

/// Listing entry for one stored session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub account_id: String,
    pub loaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fresh: bool,
    pub cookie_count: usize,
}

/// Encrypts, persists, and evaluates per-account session bundles.
pub struct SessionVault {
    store: Arc<dyn SessionStore>,
    cipher: Option<SessionCipher>,
    max_age: Duration,
}

impl SessionVault {
    /// Creates a vault. `key_material` of `None` disables every read and write.
    pub fn new(
        store: Arc<dyn SessionStore>,
        key_material: Option<&str>,
        max_age: Duration,
    ) -> VaultResult<Self> {
        let cipher = key_material
            .filter(|k| !k.trim().is_empty())
            .map(SessionCipher::from_key_material)
            .transpose()?;
        if cipher.is_none() {
            warn!("Session vault created without an encryption key");
        }
        Ok(Self {
            store,
            cipher,
            max_age,
        })
    }

    /// Opens a file-backed vault from configuration.
    pub async fn from_config(config: &VaultConfig) -> VaultResult<Self> {
        let store = FileSessionStore::open(&config.sessions_dir).await?;
        info!(dir = %config.sessions_dir.display(), "Session vault opened");
        Self::new(Arc::new(store), config.key(), config.max_age())
    }

    /// Whether a key is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    fn cipher(&self) -> VaultResult<&SessionCipher> {
        self.cipher.as_ref().ok_or(VaultError::MissingEncryptionKey)
    }

    /// Parses, seals, and persists `raw_cookie_text` for `account_id`.
    ///
    /// Fails with `MissingEncryptionKey` before touching the store when no
    /// key is configured.
    pub async fn store(&self, account_id: &str, raw_cookie_text: &str) -> VaultResult<SessionBundle> {
        let cipher = self.cipher()?;
        let key = sanitize_account_id(account_id)?;
        let bundle = SessionBundle::new(key.clone(), Utc::now(), raw_cookie_text.to_string())?;

        let payload = serde_json::to_vec(&SealedPayload {
            account_id: key.clone(),
            loaded_at: bundle.loaded_at,
            raw_cookies: bundle.raw_cookies.clone(),
        })?;
        let sealed = cipher.seal(&key, &payload)?;
        self.store.put(&key, sealed).await?;

        info!(
            account = %key,
            cookies = bundle.cookies.len(),
            "Session stored"
        );
        Ok(bundle)
    }

    /// Loads and decrypts the bundle for `account_id`.
    ///
    /// Returns `Ok(None)` when nothing is stored or the stored bytes cannot
    /// be decrypted (rotated key, tampering). Stale bundles are returned;
    /// use [`is_fresh`](Self::is_fresh) to decide what to do with them.
    pub async fn load(&self, account_id: &str) -> VaultResult<Option<SessionBundle>> {
        let cipher = self.cipher()?;
        let key = sanitize_account_id(account_id)?;

        let Some(sealed) = self.store.get(&key).await? else {
            debug!(account = %key, "No stored session");
            return Ok(None);
        };

        match Self::decode(cipher, &key, &sealed) {
            Ok(bundle) => Ok(Some(bundle)),
            Err(e) => {
                warn!(account = %key, error = %e, "Stored session is unusable");
                Ok(None)
            }
        }
    }

    fn decode(cipher: &SessionCipher, key: &str, sealed: &[u8]) -> VaultResult<SessionBundle> {
        let plaintext = cipher.open(key, sealed)?;
        let payload: SealedPayload =
            serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptionFailure {
                account: key.to_string(),
            })?;
        SessionBundle::new(payload.account_id, payload.loaded_at, payload.raw_cookies)
    }

    /// Whether `bundle` is younger than `max_age`.
    #[must_use]
    pub fn is_fresh(bundle: &SessionBundle, max_age: Duration) -> bool {
        bundle.age(Utc::now()) <= max_age
    }

    /// Freshness against the vault's configured window.
    #[must_use]
    pub fn is_fresh_now(&self, bundle: &SessionBundle) -> bool {
        Self::is_fresh(bundle, self.max_age)
    }

    /// Removes the bundle for `account_id`. Deleting a missing bundle is fine.
    pub async fn delete(&self, account_id: &str) -> VaultResult<bool> {
        let key = sanitize_account_id(account_id)?;
        let removed = self.store.delete(&key).await?;
        if removed {
            info!(account = %key, "Session deleted");
        }
        Ok(removed)
    }

    /// Lists readable sessions, newest first. Unreadable entries are skipped.
    pub async fn list(&self) -> VaultResult<Vec<SessionSummary>> {
        let cipher = self.cipher()?;
        let mut summaries = Vec::new();

        for key in self.store.keys().await? {
            let Some(sealed) = self.store.get(&key).await? else {
                continue;
            };
            match Self::decode(cipher, &key, &sealed) {
                Ok(bundle) => summaries.push(SessionSummary {
                    fresh: self.is_fresh_now(&bundle),
                    expires_at: bundle.expires_at(self.max_age),
                    cookie_count: bundle.cookies.len(),
                    account_id: bundle.account_id,
                    loaded_at: bundle.loaded_at,
                }),
                Err(e) => warn!(account = %key, error = %e, "Skipping unreadable session"),
            }
        }

        summaries.sort_by(|a, b| b.loaded_at.cmp(&a.loaded_at));
        Ok(summaries)
    }
}

impl fmt::Debug for SessionVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionVault")
            .field("enabled", &self.is_enabled())
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
    const COOKIES: &str = "# Netscape HTTP Cookie File\n\
        .instagram.com\tTRUE\t/\tTRUE\t1999999999\tsessionid\tsecret-session\n\
        .instagram.com\tTRUE\t/\tTRUE\t1999999999\tds_user_id\t4242\n";

    mock! {
        Store {}

        #[async_trait]
        impl SessionStore for Store {
            async fn put(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()>;
            async fn get(&self, key: &str) -> VaultResult<Option<Vec<u8>>>;
            async fn delete(&self, key: &str) -> VaultResult<bool>;
            async fn keys(&self) -> VaultResult<Vec<String>>;
        }
    }

    fn vault_with(store: Arc<InMemorySessionStore>, key: Option<&str>) -> SessionVault {
        SessionVault::new(store, key, WEEK).unwrap()
    }

    #[test]
    fn test_sanitize_account_id() {
        assert_eq!(sanitize_account_id("  Alice.Smith ").unwrap(), "alice.smith");
        assert_eq!(sanitize_account_id("../../etc/passwd").unwrap(), "etcpasswd");
        assert_eq!(sanitize_account_id("bob<>:\"|?*").unwrap(), "bob");
        assert!(sanitize_account_id("  ").is_err());
        assert!(sanitize_account_id("///").is_err());
        assert!(sanitize_account_id(&"a".repeat(200)).is_err());
    }

    #[test]
    fn test_sanitize_collapses_case_variants() {
        assert_eq!(
            sanitize_account_id("Alice").unwrap(),
            sanitize_account_id("alice").unwrap()
        );
    }

    #[tokio::test]
    async fn test_store_then_load_roundtrip() {
        let store = Arc::new(InMemorySessionStore::new());
        let vault = vault_with(store.clone(), Some("vault-key"));

        vault.store("Alice", COOKIES).await.unwrap();
        let bundle = vault.load("alice").await.unwrap().unwrap();

        assert_eq!(bundle.raw_cookies(), COOKIES);
        assert_eq!(bundle.account_id(), "alice");
        assert_eq!(bundle.cookie("ds_user_id").unwrap().value, "4242");
        assert!(vault.is_fresh_now(&bundle));
    }

    #[tokio::test]
    async fn test_payload_is_not_plaintext() {
        let store = Arc::new(InMemorySessionStore::new());
        let vault = vault_with(store.clone(), Some("vault-key"));
        vault.store("alice", COOKIES).await.unwrap();

        let sealed = store.get("alice").await.unwrap().unwrap();
        let haystack = String::from_utf8_lossy(&sealed);
        assert!(!haystack.contains("secret-session"));
    }

    #[tokio::test]
    async fn test_key_rotation_yields_no_session() {
        let store = Arc::new(InMemorySessionStore::new());
        vault_with(store.clone(), Some("old-key"))
            .store("alice", COOKIES)
            .await
            .unwrap();

        let rotated = vault_with(store, Some("new-key"));
        assert!(rotated.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tampered_bytes_yield_no_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let vault = vault_with(store.clone(), Some("vault-key"));
        vault.store("alice", COOKIES).await.unwrap();

        let mut sealed = store.get("alice").await.unwrap().unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        store.replace_raw("alice", sealed);

        assert!(vault.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_key_blocks_store_without_writing() {
        let mut store = MockStore::new();
        store.expect_put().never();

        let vault = SessionVault::new(Arc::new(store), None, WEEK).unwrap();
        let err = vault.store("alice", COOKIES).await.unwrap_err();
        assert!(matches!(err, VaultError::MissingEncryptionKey));
    }

    #[tokio::test]
    async fn test_missing_key_blocks_load() {
        let vault = vault_with(Arc::new(InMemorySessionStore::new()), None);
        assert!(matches!(
            vault.load("alice").await,
            Err(VaultError::MissingEncryptionKey)
        ));
    }

    #[tokio::test]
    async fn test_store_rejects_text_without_cookies() {
        let store = Arc::new(InMemorySessionStore::new());
        let vault = vault_with(store.clone(), Some("vault-key"));

        let err = vault.store("alice", "# nothing here\n").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidCookies));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_account() {
        let vault = vault_with(Arc::new(InMemorySessionStore::new()), Some("k"));
        assert!(vault.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = Arc::new(InMemorySessionStore::new());
        let vault = vault_with(store, Some("k"));
        vault.store("alice", COOKIES).await.unwrap();

        assert!(vault.delete("alice").await.unwrap());
        assert!(!vault.delete("alice").await.unwrap());
        assert!(vault.load("alice").await.unwrap().is_none());
    }

    #[test]
    fn test_freshness_window() {
        let loaded_at = Utc::now() - ChronoDuration::days(8);
        let bundle = SessionBundle::new("alice".to_string(), loaded_at, COOKIES.to_string()).unwrap();

        assert!(!SessionVault::is_fresh(&bundle, WEEK));
        assert!(SessionVault::is_fresh(&bundle, WEEK * 2));
        assert_eq!(bundle.expires_at(WEEK), loaded_at + ChronoDuration::days(7));
    }

    #[tokio::test]
    async fn test_list_skips_unreadable_and_sorts_newest_first() {
        let store = Arc::new(InMemorySessionStore::new());
        let vault = vault_with(store.clone(), Some("k"));
        vault.store("alice", COOKIES).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        vault.store("bob", COOKIES).await.unwrap();
        store.replace_raw("mallory", vec![1, 2, 3]);

        let sessions = vault.list().await.unwrap();
        let names: Vec<_> = sessions.iter().map(|s| s.account_id.as_str()).collect();
        assert_eq!(names, vec!["bob", "alice"]);
        assert!(sessions.iter().all(|s| s.fresh && s.cookie_count == 2));
    }

    #[tokio::test]
    async fn test_file_backed_vault() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig {
            sessions_dir: dir.path().to_path_buf(),
            encryption_key: Some(collector_config::SecretString::new("file-key")),
            max_age_secs: 60,
        };

        let vault = SessionVault::from_config(&config).await.unwrap();
        vault.store("Alice", COOKIES).await.unwrap();

        assert!(dir.path().join("alice.session").exists());
        assert_eq!(vault.load("alice").await.unwrap().unwrap().raw_cookies(), COOKIES);
    }
}
