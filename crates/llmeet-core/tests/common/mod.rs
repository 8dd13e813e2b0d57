#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use llmeet_core::credentials::{ACCESS_TOKEN_KEY, CredentialStore, MemoryCredentialStore};
use llmeet_core::errors::StoreError;
use llmeet_core::{GatewayConfig, RequestGateway, SessionNotifier};

/// Memory store that counts every operation.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryCredentialStore,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub deletes: AtomicUsize,
    pub saves: AtomicUsize,
}

impl CountingStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            inner: MemoryCredentialStore::with_token(token),
            ..Default::default()
        }
    }

    pub async fn token(&self) -> Option<String> {
        self.inner.get(ACCESS_TOKEN_KEY).await.unwrap()
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn save(&self) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save().await
    }
}

/// Store whose writes always fail; reads fail too unless `readable`.
pub struct FailingStore {
    inner: MemoryCredentialStore,
    readable: bool,
}

impl FailingStore {
    pub fn unreadable() -> Self {
        Self {
            inner: MemoryCredentialStore::with_token("unseen"),
            readable: false,
        }
    }

    pub fn read_only(token: &str) -> Self {
        Self {
            inner: MemoryCredentialStore::with_token(token),
            readable: true,
        }
    }

    fn broken() -> StoreError {
        StoreError::Io(std::io::Error::other("disk unavailable"))
    }
}

#[async_trait]
impl CredentialStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.readable {
            self.inner.get(key).await
        } else {
            Err(Self::broken())
        }
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), StoreError> {
        Err(Self::broken())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(Self::broken())
    }

    async fn save(&self) -> Result<(), StoreError> {
        Err(Self::broken())
    }
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub logouts: AtomicUsize,
    pub navigations: AtomicUsize,
    pub messages: Mutex<Vec<String>>,
}

impl SessionNotifier for RecordingNotifier {
    fn force_logout(&self) {
        self.logouts.fetch_add(1, Ordering::SeqCst);
    }

    fn navigate_to_login(&self) {
        self.navigations.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_user(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

pub struct Harness {
    pub gateway: Arc<RequestGateway>,
    pub store: Arc<CountingStore>,
    pub notifier: Arc<RecordingNotifier>,
}

fn gateway_config(base_url: &str, max_retries: u32) -> GatewayConfig {
    GatewayConfig {
        api_base_url: base_url.to_string(),
        max_retries,
        timeout: Duration::from_secs(10),
    }
}

pub fn harness(base_url: &str, max_retries: u32, store: CountingStore) -> Harness {
    let store = Arc::new(store);
    let notifier = Arc::new(RecordingNotifier::default());
    let config = gateway_config(base_url, max_retries);
    let gateway = RequestGateway::new(config, store.clone(), notifier.clone()).unwrap();
    Harness {
        gateway: Arc::new(gateway),
        store,
        notifier,
    }
}

/// Gateway over an arbitrary store, for stores the harness does not count.
pub fn gateway_with_store(
    base_url: &str,
    max_retries: u32,
    store: Arc<dyn CredentialStore>,
) -> (RequestGateway, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let config = gateway_config(base_url, max_retries);
    let gateway = RequestGateway::new(config, store, notifier.clone()).unwrap();
    (gateway, notifier)
}
