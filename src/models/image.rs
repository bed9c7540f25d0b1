//! # Image Model
//!
//! An uploaded image and, once processing succeeds, the location of its
//! processed counterpart. Maps to the `images` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::ImageStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub original_url: String,
    pub processed_url: Option<String>,
    pub status: ImageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Image {
    /// New `pending` image stored at `original_url`
    pub fn new(original_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            original_url: original_url.into(),
            processed_url: None,
            status: ImageStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
