//! In-memory repositories backed by `DashMap`, for tests and local runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{ImageRepository, RepositoryError, RepositoryResult, TaskRepository};
use crate::models::{Image, ProcessingTask};
use crate::state_machine::{ImageStatus, TaskStatus};

const TASK_ENTITY: &str = "processing_task";
const IMAGE_ENTITY: &str = "image";

#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<DashMap<Uuid, ProcessingTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &ProcessingTask) -> RepositoryResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(RepositoryError::AlreadyExists {
                entity: TASK_ENTITY,
                id: task.id,
            });
        }
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<ProcessingTask> {
        self.tasks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RepositoryError::not_found(TASK_ENTITY, id))
    }

    async fn get_by_image_id(&self, image_id: Uuid) -> RepositoryResult<ProcessingTask> {
        self.tasks
            .iter()
            .filter(|entry| entry.image_id == image_id)
            .max_by_key(|entry| entry.created_at)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RepositoryError::not_found(TASK_ENTITY, image_id))
    }

    async fn update(&self, task: &ProcessingTask) -> RepositoryResult<()> {
        let mut entry = self
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| RepositoryError::not_found(TASK_ENTITY, task.id))?;

        let mut updated = task.clone();
        updated.created_at = entry.created_at;
        updated.updated_at = Utc::now();
        *entry = updated;
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> RepositoryResult<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(TASK_ENTITY, id))?;

        entry.status = status;
        if let Some(message) = error_message {
            entry.error_message = Some(message.to_string());
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        error_message: Option<&str>,
    ) -> RepositoryResult<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(TASK_ENTITY, id))?;

        if entry.status != from {
            return Err(RepositoryError::status_conflict(
                TASK_ENTITY,
                id,
                from,
                entry.status,
            ));
        }

        entry.status = to;
        if let Some(message) = error_message {
            entry.error_message = Some(message.to_string());
        }
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryImageRepository {
    images: Arc<DashMap<Uuid, Image>>,
}

impl InMemoryImageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[async_trait]
impl ImageRepository for InMemoryImageRepository {
    async fn create(&self, image: &Image) -> RepositoryResult<()> {
        if self.images.contains_key(&image.id) {
            return Err(RepositoryError::AlreadyExists {
                entity: IMAGE_ENTITY,
                id: image.id,
            });
        }
        self.images.insert(image.id, image.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Image> {
        self.images
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RepositoryError::not_found(IMAGE_ENTITY, id))
    }

    async fn update(&self, image: &Image) -> RepositoryResult<()> {
        let mut entry = self
            .images
            .get_mut(&image.id)
            .ok_or_else(|| RepositoryError::not_found(IMAGE_ENTITY, image.id))?;

        let mut updated = image.clone();
        updated.created_at = entry.created_at;
        updated.updated_at = Utc::now();
        *entry = updated;
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: ImageStatus) -> RepositoryResult<()> {
        let mut entry = self
            .images
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found(IMAGE_ENTITY, id))?;

        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }
}
