use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::StoreError;

/// Key under which the bearer token is stored.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Key under which the signed-in user's profile JSON is stored.
pub const USER_INFO_KEY: &str = "userInfo";

pub const STORE_FILE_NAME: &str = "user_static_store.json";

/// Persisted key-value store holding the session credential.
///
/// Mutations are only guaranteed durable after `save()`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn save(&self) -> Result<(), StoreError>;
}

/// Process-local store. `save` is a no-op.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let entries = BTreeMap::from([(ACCESS_TOKEN_KEY.to_string(), token.into())]);
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn save(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// JSON file store in the app data directory, with auto-save off.
pub struct FileCredentialStore {
    entries: Mutex<BTreeMap<String, String>>,
    file_path: PathBuf,
}

impl FileCredentialStore {
    /// Open `user_static_store.json` in `data_dir`. A missing or corrupt
    /// file starts the store empty.
    pub async fn open(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join(STORE_FILE_NAME);
        let entries = Self::load(&file_path).await;
        Self {
            entries: Mutex::new(entries),
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    async fn load(path: &Path) -> BTreeMap<String, String> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("credential store {} unreadable, starting empty: {e}", path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn save(&self) -> Result<(), StoreError> {
        // Held across the write so concurrent saves never interleave on disk.
        let entries = self.entries.lock().await;
        let json = serde_json::to_string_pretty(&*entries)?;
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.file_path, json).await?;
        drop(entries);
        tracing::debug!("credential store saved to {}", self.file_path.display());
        Ok(())
    }
}
