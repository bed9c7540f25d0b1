//! # Image Processing Handler
//!
//! The [`TaskHandler`] installed on the worker's consumer. For each delivered
//! task it:
//!
//! 1. Loads the task; a task already `completed` or `failed` is acknowledged
//!    without changes, so redelivered messages are harmless
//! 2. Checks the message's image id against the task
//! 3. Moves the task `pending → processing` and the image to `processing`
//! 4. Runs the [`ImageProcessor`]
//! 5. Records `completed` with the processed URL, or `failed` with the error
//!    message on both task and image before returning `HandlerFailed`
//!
//! A task found in `processing` was started by a worker that did not finish;
//! it is resumed without a second `Start` transition.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::processor::ImageProcessor;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::log_task_operation;
use crate::messaging::{MessagingError, MessagingResult, TaskHandler};
use crate::models::ProcessingTask;
use crate::repository::{ImageRepository, TaskRepository};
use crate::state_machine::{ImageStatus, TaskEvent, TaskStateMachine, TaskStatus};

pub struct ImageProcessingHandler {
    tasks: Arc<dyn TaskRepository>,
    images: Arc<dyn ImageRepository>,
    processor: Arc<dyn ImageProcessor>,
}

impl ImageProcessingHandler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        images: Arc<dyn ImageRepository>,
        processor: Arc<dyn ImageProcessor>,
    ) -> Self {
        Self {
            tasks,
            images,
            processor,
        }
    }

    async fn run(
        &self,
        machine: &TaskStateMachine,
        task: &ProcessingTask,
        image_id: Uuid,
    ) -> PipelineResult<String> {
        if task.image_id != image_id {
            return Err(PipelineError::ImageMismatch {
                task_id: task.id,
                expected: task.image_id,
                actual: image_id,
            });
        }

        if task.status == TaskStatus::Pending {
            machine.transition(TaskEvent::Start).await?;
        } else {
            warn!(task_id = %task.id, status = %task.status, "Resuming interrupted task");
        }
        self.images
            .update_status(image_id, ImageStatus::Processing)
            .await?;

        let mut image = self.images.get_by_id(image_id).await?;
        let processed_url = self.processor.process(&image).await?;

        image.processed_url = Some(processed_url.clone());
        image.status = ImageStatus::Completed;
        self.images.update(&image).await?;

        machine.transition(TaskEvent::Complete).await?;

        Ok(processed_url)
    }

    /// Record the failure on the task and, when known, on its image
    ///
    /// The image is only marked failed when the task transition is recorded;
    /// a task finished by another delivery keeps its image as it is. Failures
    /// while recording are logged and the delivery is dead-lettered either way.
    async fn record_failure(
        &self,
        machine: &TaskStateMachine,
        image_id: Option<Uuid>,
        message: &str,
    ) {
        if let Err(e) = machine.transition(TaskEvent::Fail(message.to_string())).await {
            error!(task_id = %machine.task_id(), error = %e, "Failed to record task failure");
            return;
        }

        if let Some(image_id) = image_id {
            if let Err(e) = self
                .images
                .update_status(image_id, ImageStatus::Failed)
                .await
            {
                error!(image_id = %image_id, error = %e, "Failed to record image failure");
            }
        }
    }
}

#[async_trait]
impl TaskHandler for ImageProcessingHandler {
    async fn handle(&self, task_id: Uuid, image_id: Uuid) -> MessagingResult<()> {
        let task = self
            .tasks
            .get_by_id(task_id)
            .await
            .map_err(|e| MessagingError::handler_failed(task_id, e.to_string()))?;

        if task.is_terminal() {
            info!(
                task_id = %task_id,
                status = %task.status,
                "Task already finished, acknowledging redelivery"
            );
            return Ok(());
        }

        let machine = TaskStateMachine::new(task_id, self.tasks.clone());

        match self.run(&machine, &task, image_id).await {
            Ok(processed_url) => {
                log_task_operation(
                    "process_image",
                    task_id,
                    Some(image_id),
                    TaskStatus::Completed.as_str(),
                    Some(&processed_url),
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let failed_image = match e {
                    PipelineError::ImageMismatch { .. } => None,
                    _ => Some(task.image_id),
                };

                self.record_failure(&machine, failed_image, &message).await;
                log_task_operation(
                    "process_image",
                    task_id,
                    Some(image_id),
                    TaskStatus::Failed.as_str(),
                    Some(&message),
                );

                Err(MessagingError::handler_failed(task_id, message))
            }
        }
    }

    fn handler_name(&self) -> &str {
        "image_processing"
    }
}
