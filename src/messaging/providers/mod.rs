//! # Queue Providers
//!
//! - [`RabbitMqTaskQueue`]: production provider over AMQP 0.9.1
//! - [`InMemoryTaskQueue`]: broker model for tests and local runs

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::{DeadLetteredMessage, DeathRecord, InMemoryDelivery, InMemoryTaskQueue};
pub use rabbitmq::{RabbitMqDelivery, RabbitMqTaskQueue};
