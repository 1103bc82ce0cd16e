//! In-memory storage backend.
//!
//! All objects are held in a `BTreeMap` and **lost when the process exits**.
//! Clones share the same map, so a test can hand one clone to a bridge and
//! inspect the bucket through another.
//!
//! An optional per-operation latency makes polling behave more like a real
//! bucket; under a paused tokio clock the delay costs no wall time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::ObjectStorage;
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

/// Ephemeral [`ObjectStorage`] backed by a shared map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    latency: Option<Duration>,
}

impl InMemoryStorage {
    /// Create an empty store with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that sleeps `latency` before every operation.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Snapshot of all keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Content type recorded for `key`, if the object exists.
    #[must_use]
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|o| o.content_type.clone())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ObjectStorage for InMemoryStorage {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.delay().await;
        self.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.delay().await;
        Ok(self.lock().get(key).map(|o| o.body.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.delay().await;
        Ok(self.lock().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delay().await;
        self.lock().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.delay().await;
        Ok(self
            .lock()
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
