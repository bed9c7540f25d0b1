//! # Processing Task Model
//!
//! One unit of work: process a single image. Tasks are created `pending` by
//! the upload flow, picked up by a worker through the work queue and end in
//! `completed` or `failed`.
//!
//! ## Database Schema
//!
//! Maps to the `processing_tasks` table:
//! - `id`: Primary key (UUID)
//! - `image_id`: References `images(id)`, cascades on delete
//! - `status`: One of `pending`, `processing`, `completed`, `failed`
//! - `error_message`: Set only when the task fails

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::TaskStatus;

/// A request to process one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: Uuid,
    pub image_id: Uuid,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingTask {
    /// New `pending` task for `image_id`
    pub fn new(image_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            image_id,
            status: TaskStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
