use std::sync::Arc;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

use crate::services::encryption::EncryptionService;

/// Stores and retrieves uploaded document bytes by opaque key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under a fresh key and return that key.
    async fn put(&self, data: &[u8]) -> Result<String, StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove the object at `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn health_check(&self) -> Result<(), StorageError>;
}

/// Key probed by the S3 health check. It need not exist.
const HEALTH_PROBE_KEY: &str = "health/probe";

/// Object store backed by an S3-compatible bucket (AWS S3, R2, LocalStack).
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, data: &[u8]) -> Result<String, StorageError> {
        let key = format!("documents/{}", Uuid::new_v4());
        let response = self
            .bucket
            .put_object_with_content_type(&key, data, "application/octet-stream")
            .await
            .map_err(StorageError::S3)?;
        match response.status_code() {
            200..=299 => Ok(key),
            code => Err(StorageError::Unavailable(format!(
                "object store returned HTTP {code} storing {key}"
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        match response.status_code() {
            200..=299 => Ok(response.to_vec()),
            404 => Err(StorageError::NotFound(key.to_string())),
            code => Err(StorageError::Unavailable(format!(
                "object store returned HTTP {code} for {key}"
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        match response.status_code() {
            200..=299 | 404 => Ok(()),
            code => Err(StorageError::Unavailable(format!(
                "object store returned HTTP {code} deleting {key}"
            ))),
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let (_, code) = self
            .bucket
            .head_object(HEALTH_PROBE_KEY)
            .await
            .map_err(StorageError::S3)?;
        match code {
            200..=299 | 404 => Ok(()),
            code => Err(StorageError::Unavailable(format!(
                "object store returned HTTP {code} to health probe"
            ))),
        }
    }
}

/// Wraps another store, encrypting documents on `put` and decrypting on `get`.
pub struct SealedStore<S> {
    inner: S,
    encryption: Arc<EncryptionService>,
}

impl<S: ObjectStore> SealedStore<S> {
    pub fn new(inner: S, encryption: Arc<EncryptionService>) -> Self {
        Self { inner, encryption }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for SealedStore<S> {
    async fn put(&self, data: &[u8]) -> Result<String, StorageError> {
        let sealed = self
            .encryption
            .encrypt(data)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        self.inner.put(&sealed).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let sealed = self.inner.get(key).await?;
        self.encryption
            .decrypt(&sealed)
            .map_err(|e| StorageError::Corrupt(format!("{key}: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.inner.health_check().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document unreadable: {0}")]
    Corrupt(String),

    #[error("Object store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
