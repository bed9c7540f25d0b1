//! # Repositories
//!
//! Async persistence contracts for tasks and images with a PostgreSQL
//! implementation and an in-memory one for tests and local runs. Missing
//! rows are always reported as [`RepositoryError::NotFound`].

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Image, ProcessingTask};
use crate::state_machine::{ImageStatus, TaskStatus};

pub use in_memory::{InMemoryImageRepository, InMemoryTaskRepository};
pub use postgres::{PgImageRepository, PgTaskRepository};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: Uuid },

    #[error("{entity} {id} is {actual}, expected {expected}")]
    StatusConflict {
        entity: &'static str,
        id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("Invalid {entity} data: {reason}")]
    InvalidData { entity: &'static str, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn invalid_data(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            entity,
            reason: reason.into(),
        }
    }

    pub fn status_conflict(
        entity: &'static str,
        id: Uuid,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::StatusConflict {
            entity,
            id,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Persistence for processing tasks
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &ProcessingTask) -> RepositoryResult<()>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<ProcessingTask>;

    /// Most recently created task for `image_id`
    async fn get_by_image_id(&self, image_id: Uuid) -> RepositoryResult<ProcessingTask>;

    /// Save every mutable field and refresh `updated_at`
    async fn update(&self, task: &ProcessingTask) -> RepositoryResult<()>;

    /// Set `status`, and `error_message` when one is given
    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> RepositoryResult<()>;

    /// Move the task from `from` to `to` only if it is still in `from`
    ///
    /// Fails with `StatusConflict` carrying the stored status when another
    /// writer got there first.
    async fn transition_status(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        error_message: Option<&str>,
    ) -> RepositoryResult<()>;
}

/// Persistence for images
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn create(&self, image: &Image) -> RepositoryResult<()>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Image>;

    /// Save every mutable field and refresh `updated_at`
    async fn update(&self, image: &Image) -> RepositoryResult<()>;

    async fn update_status(&self, id: Uuid, status: ImageStatus) -> RepositoryResult<()>;
}
