//! # Upload Service
//!
//! Producer side of the pipeline: stores uploaded bytes, records the image
//! and schedules one processing task per image at a time.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::logging::log_task_operation;
use crate::messaging::TaskQueue;
use crate::models::{Image, ProcessingTask};
use crate::repository::{ImageRepository, TaskRepository};
use crate::state_machine::{ImageStatus, TaskEvent, TaskStateMachine};
use crate::storage::ObjectStorage;

/// Image and task created for one upload
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub image: Image,
    pub task: ProcessingTask,
}

pub struct UploadService {
    storage: Arc<dyn ObjectStorage>,
    images: Arc<dyn ImageRepository>,
    tasks: Arc<dyn TaskRepository>,
    queue: Arc<dyn TaskQueue>,
    uploads_bucket: String,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        images: Arc<dyn ImageRepository>,
        tasks: Arc<dyn TaskRepository>,
        queue: Arc<dyn TaskQueue>,
        uploads_bucket: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            images,
            tasks,
            queue,
            uploads_bucket: uploads_bucket.into(),
        }
    }

    /// Store an upload and schedule its processing
    pub async fn register_upload(
        &self,
        filename: &str,
        data: &[u8],
        content_type: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<UploadReceipt> {
        let image_id = Uuid::new_v4();
        let original_url = self
            .storage
            .upload_file(&self.uploads_bucket, &image_id.to_string(), data, content_type)
            .await?;

        let image = Image {
            id: image_id,
            ..Image::new(original_url)
        };
        if let Err(e) = self.images.create(&image).await {
            self.discard_upload(image_id).await;
            return Err(e.into());
        }

        info!(
            image_id = %image.id,
            filename = %filename,
            size = data.len(),
            "Registered upload"
        );

        let task = self.schedule_processing(image.id, cancel).await?;
        Ok(UploadReceipt { image, task })
    }

    /// Create and publish a processing task for an existing image
    ///
    /// Refused with `TaskInProgress` while the image's latest task is not
    /// finished. When publishing fails the new task is marked `failed` with
    /// the publish error, and the error is returned.
    pub async fn schedule_processing(
        &self,
        image_id: Uuid,
        cancel: &CancellationToken,
    ) -> PipelineResult<ProcessingTask> {
        let image = self.images.get_by_id(image_id).await?;

        match self.tasks.get_by_image_id(image_id).await {
            Ok(existing) if !existing.is_terminal() => {
                return Err(PipelineError::TaskInProgress {
                    image_id,
                    task_id: existing.id,
                });
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if image.status != ImageStatus::Pending {
            self.images
                .update_status(image_id, ImageStatus::Pending)
                .await?;
        }

        let task = ProcessingTask::new(image_id);
        self.tasks.create(&task).await?;

        if let Err(e) = self.queue.publish_task(task.id, image_id, cancel).await {
            let message = format!("failed to publish task: {e}");
            self.record_publish_failure(&task, &message).await;
            return Err(e.into());
        }

        log_task_operation(
            "schedule_processing",
            task.id,
            Some(image_id),
            task.status.as_str(),
            None,
        );

        Ok(task)
    }

    /// Remove stored bytes that no image row refers to
    async fn discard_upload(&self, image_id: Uuid) {
        let object = image_id.to_string();
        match self.storage.delete_file(&self.uploads_bucket, &object).await {
            Ok(()) => warn!(
                image_id = %image_id,
                bucket = %self.uploads_bucket,
                "Discarded stored upload after failing to record the image"
            ),
            Err(e) => error!(
                image_id = %image_id,
                bucket = %self.uploads_bucket,
                error = %e,
                "Failed to discard orphaned upload"
            ),
        }
    }

    async fn record_publish_failure(&self, task: &ProcessingTask, message: &str) {
        let machine = TaskStateMachine::new(task.id, self.tasks.clone());
        if let Err(e) = machine.transition(TaskEvent::Fail(message.to_string())).await {
            error!(task_id = %task.id, error = %e, "Failed to record publish failure on task");
        }
        if let Err(e) = self
            .images
            .update_status(task.image_id, ImageStatus::Failed)
            .await
        {
            error!(image_id = %task.image_id, error = %e, "Failed to record publish failure on image");
        }

        log_task_operation(
            "schedule_processing",
            task.id,
            Some(task.image_id),
            ImageStatus::Failed.as_str(),
            Some(message),
        );
    }
}
