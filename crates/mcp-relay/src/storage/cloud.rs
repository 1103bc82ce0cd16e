//! Cloud bucket backends (GCS and S3) on top of `object_store`.
//!
//! Credentials come from the environment in the usual way for each provider
//! (`GOOGLE_APPLICATION_CREDENTIALS`, `AWS_ACCESS_KEY_ID`, instance metadata,
//! ...). For GCS an explicit service account key file may be given instead.

use std::path::Path as FsPath;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::debug;

use super::ObjectStorage;
use crate::error::{Error, Result};

/// [`ObjectStorage`] over any `object_store` implementation.
#[derive(Debug)]
pub struct CloudStorage {
    store: Box<dyn ObjectStore>,
}

impl CloudStorage {
    /// Connect to a Google Cloud Storage bucket.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the client cannot be configured, for
    /// example when the credentials file is unreadable.
    pub fn gcs(bucket: &str, credentials: Option<&FsPath>) -> Result<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(path) = credentials {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }
        let store = builder
            .build()
            .map_err(|e| Error::storage("connect", bucket, e))?;
        debug!(bucket, "Configured GCS storage");
        Ok(Self::from_store(Box::new(store)))
    }

    /// Connect to an S3 bucket, or an S3-compatible store at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the client cannot be configured.
    pub fn s3(bucket: &str, endpoint: Option<&str>) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = builder
            .build()
            .map_err(|e| Error::storage("connect", bucket, e))?;
        debug!(bucket, endpoint, "Configured S3 storage");
        Ok(Self::from_store(Box::new(store)))
    }

    /// Wrap an already-configured store.
    #[must_use]
    pub fn from_store(store: Box<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

fn parse_key(operation: &'static str, key: &str) -> Result<Path> {
    Path::parse(key).map_err(|e| Error::storage(operation, key, e))
}

#[async_trait]
impl ObjectStorage for CloudStorage {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let path = parse_key("put", key)?;
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..PutOptions::default()
        };
        self.store
            .put_opts(&path, PutPayload::from(body), options)
            .await
            .map_err(|e| Error::storage("put", key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = parse_key("get", key)?;
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(Error::storage("get", key, e)),
        };
        match result.bytes().await {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::storage("get", key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = parse_key("exists", key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Error::storage("exists", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = parse_key("delete", key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::storage("delete", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = parse_key("list", prefix)?;
        self.store
            .list(Some(&path))
            .map_ok(|meta| meta.location.to_string())
            .try_filter(|key| futures::future::ready(key.starts_with(prefix)))
            .try_collect()
            .await
            .map_err(|e| Error::storage("list", prefix, e))
    }
}
