//! PostgreSQL repositories over a shared `PgPool`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{ImageRepository, RepositoryError, RepositoryResult, TaskRepository};
use crate::models::{Image, ProcessingTask};
use crate::state_machine::{ImageStatus, TaskStatus};

const TASK_ENTITY: &str = "processing_task";
const IMAGE_ENTITY: &str = "image";

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    image_id: Uuid,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for ProcessingTask {
    type Error = RepositoryError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status: TaskStatus = row
            .status
            .parse()
            .map_err(|e: String| RepositoryError::invalid_data(TASK_ENTITY, e))?;

        Ok(Self {
            id: row.id,
            image_id: row.image_id,
            status,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ImageRow {
    id: Uuid,
    original_url: String,
    processed_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ImageRow> for Image {
    type Error = RepositoryError;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        let status: ImageStatus = row
            .status
            .parse()
            .map_err(|e: String| RepositoryError::invalid_data(IMAGE_ENTITY, e))?;

        Ok(Self {
            id: row.id,
            original_url: row.original_url,
            processed_url: row.processed_url,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn create(&self, task: &ProcessingTask) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_tasks (id, image_id, status, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(task.id)
        .bind(task.image_id)
        .bind(task.status.as_str())
        .bind(task.error_message.as_deref())
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(task_id = %task.id, image_id = %task.image_id, "Created processing task");
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<ProcessingTask> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, image_id, status, error_message, created_at, updated_at
            FROM processing_tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::not_found(TASK_ENTITY, id))?;

        row.try_into()
    }

    async fn get_by_image_id(&self, image_id: Uuid) -> RepositoryResult<ProcessingTask> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, image_id, status, error_message, created_at, updated_at
            FROM processing_tasks
            WHERE image_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::not_found(TASK_ENTITY, image_id))?;

        row.try_into()
    }

    async fn update(&self, task: &ProcessingTask) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET image_id = $2, status = $3, error_message = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(task.image_id)
        .bind(task.status.as_str())
        .bind(task.error_message.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(TASK_ENTITY, task.id));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET status = $2, error_message = COALESCE($3, error_message), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(TASK_ENTITY, id));
        }

        debug!(task_id = %id, status = %status, "Updated task status");
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        error_message: Option<&str>,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET status = $3, error_message = COALESCE($4, error_message), updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_by_id(id).await?;
            return Err(RepositoryError::status_conflict(
                TASK_ENTITY,
                id,
                from,
                current.status,
            ));
        }

        debug!(task_id = %id, from = %from, to = %to, "Transitioned task status");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgImageRepository {
    pool: PgPool,
}

impl PgImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageRepository for PgImageRepository {
    async fn create(&self, image: &Image) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO images (id, original_url, processed_url, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(image.id)
        .bind(&image.original_url)
        .bind(image.processed_url.as_deref())
        .bind(image.status.as_str())
        .bind(image.created_at)
        .bind(image.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(image_id = %image.id, "Created image");
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Image> {
        let row = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT id, original_url, processed_url, status, created_at, updated_at
            FROM images
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::not_found(IMAGE_ENTITY, id))?;

        row.try_into()
    }

    async fn update(&self, image: &Image) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE images
            SET original_url = $2, processed_url = $3, status = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(image.id)
        .bind(&image.original_url)
        .bind(image.processed_url.as_deref())
        .bind(image.status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(IMAGE_ENTITY, image.id));
        }
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: ImageStatus) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE images
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found(IMAGE_ENTITY, id));
        }

        debug!(image_id = %id, status = %status, "Updated image status");
        Ok(())
    }
}
