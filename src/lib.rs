#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Image Pipeline
//!
//! Asynchronous image processing dispatch over RabbitMQ.
//!
//! ## Overview
//!
//! Uploads are stored in object storage and recorded as images. Each image
//! gets a processing task which is published to a durable work queue. A
//! worker consumes the queue one message at a time, runs the processing step
//! and records the outcome on the task. Failed deliveries are rejected
//! without requeue and collect in a dead-letter queue for inspection.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Message envelope, queue topology, publisher and consumer
//! - [`state_machine`] - Task lifecycle states and transitions
//! - [`models`] - Image and processing task records
//! - [`repository`] - PostgreSQL and in-memory persistence
//! - [`storage`] - Bucketed object storage with signed URLs
//! - [`services`] - Upload scheduling and the worker's processing handler
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`database`] - Connection pool and migrations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use image_pipeline::messaging::{handler_fn, InMemoryTaskQueue, TaskQueue};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = InMemoryTaskQueue::new()?;
//! let cancel = CancellationToken::new();
//!
//! let handler = Arc::new(handler_fn("print", |task_id, image_id| async move {
//!     println!("processing {task_id} for {image_id}");
//!     Ok(())
//! }));
//! let consumer = queue.consume_tasks(handler, &cancel).await?;
//!
//! queue.publish_task(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), &cancel).await?;
//!
//! consumer.shutdown(std::time::Duration::from_secs(5)).await?;
//! queue.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod repository;
pub mod services;
pub mod state_machine;
pub mod storage;

pub use error::{PipelineError, PipelineResult};
pub use messaging::{
    ConsumerHandle, MessagingError, MessagingResult, ProcessingMessage, QueueTopology, TaskHandler,
    TaskQueue,
};
pub use models::{Image, ProcessingTask};
pub use state_machine::{ImageStatus, TaskEvent, TaskStateMachine, TaskStatus};
