//! Durable keyed byte stores for sealed session bundles.

use crate::VaultResult;
use async_trait::async_trait;
use collector_core::Interface;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const SESSION_EXTENSION: &str = "session";

/// Keyed byte store with atomic overwrite and delete-by-key.
///
/// Keys are sanitized account ids; the store never sees plaintext.
#[async_trait]
pub trait SessionStore: Interface {
    /// Atomically replaces the bytes stored under `key`.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()>;

    /// Returns the bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> VaultResult<Option<Vec<u8>>>;

    /// Removes `key`. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> VaultResult<bool>;

    /// Lists every stored key.
    async fn keys(&self) -> VaultResult<Vec<String>>;
}

/// One `<key>.session` file per account inside a directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Creates the store, creating `dir` if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> VaultResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{SESSION_EXTENSION}"))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()> {
        let dir = self.dir.clone();
        let target = self.path_for(key);

        // Sibling temp file, then rename over the target.
        tokio::task::spawn_blocking(move || -> VaultResult<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e))??;

        debug!(key, "Session bundle written");
        Ok(())
    }

    async fn get(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> VaultResult<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> VaultResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Process-local store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw access for tests that tamper with stored bytes.
    pub fn replace_raw(&self, key: &str, bytes: Vec<u8>) {
        self.entries.write().insert(key.to_string(), bytes);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()> {
        self.entries.write().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> VaultResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn keys(&self) -> VaultResult<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
