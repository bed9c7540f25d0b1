//! # Pipeline Services
//!
//! - [`UploadService`]: stores uploads and schedules processing tasks
//! - [`ImageProcessingHandler`]: the worker's task handler
//! - [`ImageProcessor`]: the processing step itself

pub mod image_processing;
pub mod processor;
pub mod upload;

pub use image_processing::ImageProcessingHandler;
pub use processor::{object_name, ImageProcessor, PassthroughProcessor};
pub use upload::{UploadReceipt, UploadService};
