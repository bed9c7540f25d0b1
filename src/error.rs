use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::repository::RepositoryError;
use crate::state_machine::StateMachineError;
use crate::storage::StorageError;

/// Crate-level error for flows that span several subsystems
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Image {image_id} already has an unfinished task {task_id}")]
    TaskInProgress { image_id: Uuid, task_id: Uuid },

    #[error("Task {task_id} belongs to image {expected}, message named image {actual}")]
    ImageMismatch {
        task_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },

    #[error("Processing image {image_id} failed: {message}")]
    Processing { image_id: Uuid, message: String },
}

impl PipelineError {
    pub fn processing(image_id: Uuid, message: impl Into<String>) -> Self {
        Self::Processing {
            image_id,
            message: message.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
