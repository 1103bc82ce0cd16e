//! Fault-injecting storage wrapper for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::ObjectStorage;
use crate::error::{Error, Result};

/// A storage operation that [`FlakyStorage`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    /// [`ObjectStorage::put`]
    Put,
    /// [`ObjectStorage::get`]
    Get,
    /// [`ObjectStorage::exists`]
    Exists,
    /// [`ObjectStorage::delete`]
    Delete,
    /// [`ObjectStorage::list`]
    List,
}

impl StorageOp {
    fn name(self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Get => "get",
            Self::Exists => "exists",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    pending_failures: HashMap<StorageOp, u32>,
    calls: HashMap<StorageOp, u32>,
}

/// Wraps another backend and fails the next N calls of chosen operations.
///
/// Every call is counted, failed or not, so tests can assert how often a
/// bridge touched the bucket. Injected failures surface as
/// `Error::Storage` with an `"injected failure"` source.
///
/// # Example
///
/// ```rust,ignore
/// use mcp_relay::storage::{FlakyStorage, InMemoryStorage, StorageOp};
///
/// let storage = FlakyStorage::new(Arc::new(InMemoryStorage::new()));
/// storage.fail_next(StorageOp::Put, 2);
/// ```
#[derive(Clone)]
pub struct FlakyStorage {
    inner: Arc<dyn ObjectStorage>,
    counters: Arc<Mutex<Counters>>,
}

impl FlakyStorage {
    /// Wrap `inner`; no failures are scheduled initially.
    #[must_use]
    pub fn new(inner: Arc<dyn ObjectStorage>) -> Self {
        Self {
            inner,
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    /// Fail the next `count` calls of `op`, in addition to any already queued.
    pub fn fail_next(&self, op: StorageOp, count: u32) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.pending_failures.entry(op).or_default() += count;
    }

    /// Number of calls of `op` made so far.
    #[must_use]
    pub fn calls(&self, op: StorageOp) -> u32 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.calls.get(&op).copied().unwrap_or_default()
    }

    fn check(&self, op: StorageOp, key: &str) -> Result<()> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.calls.entry(op).or_default() += 1;
        match counters.pending_failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(Error::storage(op.name(), key, "injected failure"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStorage for FlakyStorage {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.check(StorageOp::Put, key)?;
        self.inner.put(key, body, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check(StorageOp::Get, key)?;
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check(StorageOp::Exists, key)?;
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(StorageOp::Delete, key)?;
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check(StorageOp::List, prefix)?;
        self.inner.list(prefix).await
    }
}
