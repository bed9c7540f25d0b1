//! Image processing step run by the worker for each task.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::models::Image;
use crate::storage::ObjectStorage;

const PROCESSED_CONTENT_TYPE: &str = "application/octet-stream";

/// Turns an uploaded image into its processed counterpart
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Process `image` and return the URL of the result
    async fn process(&self, image: &Image) -> PipelineResult<String>;

    fn processor_name(&self) -> &str {
        "image_processor"
    }
}

/// Object key of an image's bytes in both buckets
pub fn object_name(image: &Image) -> String {
    image.id.to_string()
}

/// Copies the original bytes unchanged into the processed bucket
pub struct PassthroughProcessor {
    storage: Arc<dyn ObjectStorage>,
    source_bucket: String,
    target_bucket: String,
}

impl PassthroughProcessor {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        source_bucket: impl Into<String>,
        target_bucket: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            source_bucket: source_bucket.into(),
            target_bucket: target_bucket.into(),
        }
    }
}

#[async_trait]
impl ImageProcessor for PassthroughProcessor {
    async fn process(&self, image: &Image) -> PipelineResult<String> {
        let object = object_name(image);
        let data = self
            .storage
            .download_file(&self.source_bucket, &object)
            .await?;

        if data.is_empty() {
            return Err(PipelineError::processing(image.id, "image is empty"));
        }

        let url = self
            .storage
            .upload_file(&self.target_bucket, &object, &data, PROCESSED_CONTENT_TYPE)
            .await?;

        debug!(
            image_id = %image.id,
            bytes = data.len(),
            target_bucket = %self.target_bucket,
            "Copied image to processed bucket"
        );

        Ok(url)
    }

    fn processor_name(&self) -> &str {
        "passthrough"
    }
}
