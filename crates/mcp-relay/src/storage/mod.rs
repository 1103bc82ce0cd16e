//! Object storage abstraction.
//!
//! Both bridges talk to the bucket through the [`ObjectStorage`] trait, a
//! deliberately small surface (`put`, `get`, `exists`, `delete`, `list`) that
//! every backend can provide:
//!
//! - **Cloud** ([`cloud`]): Google Cloud Storage and S3 (or S3-compatible)
//!   buckets via the `object_store` crate
//! - **Local** ([`local`]): a directory tree, so both halves can run on one
//!   host or share a mounted volume
//! - **In-memory** ([`in_memory`]): ephemeral, for tests and embedding
//!
//! # Semantics
//!
//! - `get` of an absent key is `Ok(None)`, not an error.
//! - `delete` of an absent key succeeds.
//! - `list` returns full keys (not relative names) for every object whose
//!   key starts with the given prefix, in no particular order.
//!
//! Backends must provide read-after-write consistency for a single key; the
//! bridges poll for objects and rely on seeing them once written.
//!
//! # Test Utilities
//!
//! [`FlakyStorage`] wraps any backend and fails chosen operations on demand.
//! It is available in this crate's tests and, for other crates, behind the
//! `test-util` feature.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

pub mod cloud;
#[cfg(any(test, feature = "test-util"))]
pub mod flaky;
pub mod in_memory;
pub mod local;

#[cfg(any(test, feature = "test-util"))]
pub use flaky::{FlakyStorage, StorageOp};
pub use in_memory::InMemoryStorage;
pub use local::LocalStorage;

/// Delay before the first upload retry; doubled on each further attempt.
pub const INITIAL_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Minimal object storage interface used by both bridges.
///
/// Implementations must be `Send + Sync`; a single instance is shared by
/// every in-flight task through an `Arc<dyn ObjectStorage>`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Read the object at `key`. Returns `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove the object at `key`. Removing an absent object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys of all objects whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Which storage backend to use and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Google Cloud Storage bucket.
    Gcs {
        /// Bucket name.
        bucket: String,
        /// Service account JSON key file. Falls back to the environment.
        credentials: Option<PathBuf>,
    },

    /// Amazon S3 or an S3-compatible store.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Custom endpoint URL for S3-compatible stores.
        endpoint: Option<String>,
    },

    /// Directory tree on a local or mounted filesystem.
    Local {
        /// Root directory; keys are paths below it.
        root: PathBuf,
    },

    /// Process-local map (ephemeral).
    InMemory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcs { bucket, .. } => write!(f, "gs://{bucket}"),
            Self::S3 { bucket, .. } => write!(f, "s3://{bucket}"),
            Self::Local { root } => write!(f, "file://{}", root.display()),
            Self::InMemory => f.write_str("memory"),
        }
    }
}

/// Create a storage instance for the given backend.
///
/// # Errors
///
/// - `Error::Storage` if a cloud client cannot be built (bad bucket name,
///   unreadable credentials, invalid endpoint)
/// - `Error::Io` if the local root directory cannot be created
pub async fn create_storage(backend: StorageBackend) -> Result<Arc<dyn ObjectStorage>> {
    match backend {
        StorageBackend::Gcs {
            bucket,
            credentials,
        } => Ok(Arc::new(cloud::CloudStorage::gcs(
            &bucket,
            credentials.as_deref(),
        )?)),
        StorageBackend::S3 { bucket, endpoint } => Ok(Arc::new(cloud::CloudStorage::s3(
            &bucket,
            endpoint.as_deref(),
        )?)),
        StorageBackend::Local { root } => Ok(Arc::new(LocalStorage::open(root).await?)),
        StorageBackend::InMemory => Ok(Arc::new(InMemoryStorage::new())),
    }
}

/// Upload with bounded retries.
///
/// Makes one attempt plus up to `retries` more, sleeping
/// [`INITIAL_RETRY_BACKOFF`] before the first retry and doubling the delay
/// each time after. Returns the last error if every attempt fails.
///
/// # Errors
///
/// Returns the error of the final failed attempt.
pub async fn put_with_retries(
    storage: &dyn ObjectStorage,
    key: &str,
    body: &[u8],
    content_type: &str,
    retries: u32,
) -> Result<()> {
    let mut backoff = INITIAL_RETRY_BACKOFF;
    let mut attempt = 0;
    loop {
        match storage.put(key, body.to_vec(), content_type).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(key, attempt, error = %e, "Upload failed, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}
