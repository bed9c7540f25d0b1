//! Filesystem-backed object storage.
//!
//! Buckets are directories under a root directory and objects are files
//! within them; nested object names (`2024/01/a.png`) become subdirectories.
//! URLs take the form
//! `{base}/{bucket}/{object}?expires=<unix seconds>&signature=<hex sha256>`,
//! where the signature covers the secret, bucket, object and expiry.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{ObjectStorage, StorageError, StorageResult};
use crate::config::StorageConfig;

#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
    public_base_url: String,
    signing_secret: String,
    url_expiration: Duration,
}

impl FilesystemStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_secret: impl Into<String>,
        url_expiration: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
            url_expiration,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.root_dir.clone(),
            config.public_base_url.clone(),
            config.signing_secret.clone(),
            config.presigned_url_expiration(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check a URL produced by [`ObjectStorage::get_file_url`]
    ///
    /// Returns the bucket and object the URL grants access to.
    pub fn verify_signed_url(&self, url: &str) -> StorageResult<(String, String)> {
        let rest = url
            .strip_prefix(&self.public_base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StorageError::invalid_signed_url("URL does not match the public base"))?;

        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| StorageError::invalid_signed_url("missing query string"))?;
        let (bucket, encoded_object) = path
            .split_once('/')
            .ok_or_else(|| StorageError::invalid_signed_url("missing object name"))?;
        let object = decode_object(encoded_object)?;

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", value)) => expires = Some(value),
                Some(("signature", value)) => signature = Some(value),
                _ => {}
            }
        }

        let expires_at: i64 = expires
            .ok_or_else(|| StorageError::invalid_signed_url("missing expires"))?
            .parse()
            .map_err(|_| StorageError::invalid_signed_url("expires is not a timestamp"))?;
        let signature =
            signature.ok_or_else(|| StorageError::invalid_signed_url("missing signature"))?;

        let expected = self.sign(bucket, &object, expires_at);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(StorageError::invalid_signed_url("signature mismatch"));
        }
        if Utc::now().timestamp() > expires_at {
            return Err(StorageError::Expired { expires_at });
        }

        Ok((bucket.to_string(), object))
    }

    fn sign(&self, bucket: &str, object: &str, expires_at: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(bucket.as_bytes());
        hasher.update(b"\n");
        hasher.update(object.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires_at.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn signed_url(&self, bucket: &str, object: &str) -> String {
        let expires_at = Utc::now().timestamp() + self.url_expiration.as_secs() as i64;
        format!(
            "{}/{}/{}?expires={}&signature={}",
            self.public_base_url,
            bucket,
            encode_object(object),
            expires_at,
            self.sign(bucket, object, expires_at)
        )
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join(bucket))
    }

    async fn existing_bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        let path = self.bucket_path(bucket)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::BucketNotFound {
                bucket: bucket.to_string(),
            });
        }
        Ok(path)
    }

    async fn existing_object_path(&self, bucket: &str, object: &str) -> StorageResult<PathBuf> {
        validate_object_name(object)?;
        let path = self.existing_bucket_path(bucket).await?.join(object);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStorage for FilesystemStorage {
    async fn upload_file(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
        content_type: &str,
    ) -> StorageResult<String> {
        validate_object_name(object)?;
        let path = self.existing_bucket_path(bucket).await?.join(object);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        debug!(
            bucket = %bucket,
            object = %object,
            size = data.len(),
            content_type = %content_type,
            "Stored object"
        );

        Ok(self.signed_url(bucket, object))
    }

    async fn download_file(&self, bucket: &str, object: &str) -> StorageResult<Vec<u8>> {
        let path = self.existing_object_path(bucket, object).await?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn get_file_url(&self, bucket: &str, object: &str) -> StorageResult<String> {
        self.existing_object_path(bucket, object).await?;
        Ok(self.signed_url(bucket, object))
    }

    async fn delete_file(&self, bucket: &str, object: &str) -> StorageResult<()> {
        let path = self.existing_object_path(bucket, object).await?;
        tokio::fs::remove_file(path).await?;
        debug!(bucket = %bucket, object = %object, "Deleted object");
        Ok(())
    }

    async fn ensure_bucket_exists(&self, bucket: &str) -> StorageResult<()> {
        let path = self.bucket_path(bucket)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        tokio::fs::create_dir_all(&path).await?;
        info!(bucket = %bucket, path = %path.display(), "Created bucket");
        Ok(())
    }
}

fn validate_bucket_name(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty() || bucket == "." || bucket == ".." {
        return Err(StorageError::invalid_name(bucket, "not a bucket name"));
    }
    if bucket.contains(['/', '\\']) {
        return Err(StorageError::invalid_name(
            bucket,
            "bucket names cannot contain path separators",
        ));
    }
    Ok(())
}

fn validate_object_name(object: &str) -> StorageResult<()> {
    if object.is_empty() || object.contains('\\') {
        return Err(StorageError::invalid_name(object, "not an object name"));
    }
    let path = Path::new(object);
    if path.is_absolute() {
        return Err(StorageError::invalid_name(object, "object names must be relative"));
    }
    for component in path.components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(StorageError::invalid_name(
                object,
                "object names cannot contain '.' or '..' segments",
            ));
        }
    }
    if object.split('/').any(str::is_empty) {
        return Err(StorageError::invalid_name(object, "empty path segment"));
    }
    Ok(())
}

fn encode_object(object: &str) -> String {
    object
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn decode_object(encoded: &str) -> StorageResult<String> {
    let segments = encoded
        .split('/')
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .map_err(|_| StorageError::invalid_signed_url("object name is not valid UTF-8"))
        })
        .collect::<StorageResult<Vec<_>>>()?;
    Ok(segments.join("/"))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
