//! # Data Models
//!
//! Plain records for the two persisted entities. Persistence lives behind the
//! traits in [`crate::repository`].

pub mod image;
pub mod task;

pub use image::Image;
pub use task::ProcessingTask;
