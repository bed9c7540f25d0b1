//! # Object Storage
//!
//! Bucketed blob storage for original and processed images. URLs handed out
//! by a storage backend are time-limited and signed.

pub mod filesystem;

use async_trait::async_trait;
use thiserror::Error;

pub use filesystem::FilesystemStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    #[error("Object not found: {bucket}/{object}")]
    ObjectNotFound { bucket: String, object: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid signed URL: {reason}")]
    InvalidSignedUrl { reason: String },

    #[error("Signed URL expired at {expires_at}")]
    Expired { expires_at: i64 },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_signed_url(reason: impl Into<String>) -> Self {
        Self::InvalidSignedUrl {
            reason: reason.into(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Bucketed object storage
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` and return a signed URL for it
    async fn upload_file(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        content_type: &str,
    ) -> StorageResult<String>;

    /// Read an object back
    async fn download_file(&self, bucket: &str, object: &str) -> StorageResult<Vec<u8>>;

    /// Time-limited signed URL for an existing object
    async fn get_file_url(&self, bucket: &str, object: &str) -> StorageResult<String>;

    async fn delete_file(&self, bucket: &str, object: &str) -> StorageResult<()>;

    /// Create the bucket if it does not exist
    async fn ensure_bucket_exists(&self, bucket: &str) -> StorageResult<()>;
}
