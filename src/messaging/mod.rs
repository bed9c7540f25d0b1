//! # Messaging Module
//!
//! Task dispatch over a durable work queue with dead-letter handling.
//!
//! - [`message`]: the JSON envelope carried by every task message
//! - [`topology`]: exchange, work queue and DLQ declaration
//! - [`queue`]: the provider-agnostic [`TaskQueue`] contract
//! - [`consumer`]: the receive loop, settlement and its owner handle
//! - [`providers`]: RabbitMQ and in-memory implementations

pub mod consumer;
pub mod errors;
pub mod handler;
pub mod message;
pub mod providers;
pub mod queue;
pub mod topology;

pub use consumer::{
    process_delivery, run_receive_loop, AckableDelivery, ConsumerHandle, ConsumerStats,
    DeliveryOutcome, DeliveryReport, RejectReason,
};
pub use errors::{MessagingError, MessagingResult};
pub use handler::{handler_fn, FnTaskHandler, TaskHandler};
pub use message::ProcessingMessage;
pub use providers::{InMemoryTaskQueue, RabbitMqTaskQueue};
pub use queue::TaskQueue;
pub use topology::QueueTopology;
