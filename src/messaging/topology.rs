//! # Queue Topology
//!
//! Declares the exchange, the dead-letter queue and the work queue, then binds
//! the work queue under the routing key. Every entity is durable and every
//! declaration is idempotent: declaring the same entity with the same
//! arguments against an already configured broker is a no-op.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::info;

use super::errors::{MessagingError, MessagingResult};
use crate::constants::topology::{
    DEAD_LETTER_EXCHANGE_ARG, DEAD_LETTER_ROUTING_KEY_ARG, DEFAULT_EXCHANGE, DLQ_NAME,
    EXCHANGE_NAME, QUEUE_NAME, ROUTING_KEY,
};

/// Names of the entities that make up the processing topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub exchange: String,
    pub work_queue: String,
    pub dead_letter_queue: String,
    pub routing_key: String,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            exchange: EXCHANGE_NAME.to_string(),
            work_queue: QUEUE_NAME.to_string(),
            dead_letter_queue: DLQ_NAME.to_string(),
            routing_key: ROUTING_KEY.to_string(),
        }
    }
}

impl QueueTopology {
    /// Dead-letter arguments for the work queue
    ///
    /// Rejections without requeue go through the default exchange, which
    /// routes them to the dead-letter queue by name.
    pub fn dead_letter_arguments(&self) -> Vec<(&'static str, String)> {
        vec![
            (DEAD_LETTER_EXCHANGE_ARG, DEFAULT_EXCHANGE.to_string()),
            (DEAD_LETTER_ROUTING_KEY_ARG, self.dead_letter_queue.clone()),
        ]
    }

    fn work_queue_field_table(&self) -> FieldTable {
        let mut args = FieldTable::default();
        for (key, value) in self.dead_letter_arguments() {
            args.insert(key.into(), AMQPValue::LongString(value.into()));
        }
        args
    }

    /// Bring a channel into the expected topology
    ///
    /// All four declarations must succeed; the first failure is reported as
    /// `SetupFailed` naming the step. The caller owns cleanup of the channel.
    pub async fn declare(&self, channel: &Channel) -> MessagingResult<()> {
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::setup_failed(
                    "declare_exchange",
                    format!("{}: {}", self.exchange, e),
                )
            })?;

        channel
            .queue_declare(
                &self.dead_letter_queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::setup_failed(
                    "declare_dead_letter_queue",
                    format!("{}: {}", self.dead_letter_queue, e),
                )
            })?;

        channel
            .queue_declare(
                &self.work_queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                self.work_queue_field_table(),
            )
            .await
            .map_err(|e| {
                MessagingError::setup_failed(
                    "declare_work_queue",
                    format!("{}: {}", self.work_queue, e),
                )
            })?;

        channel
            .queue_bind(
                &self.work_queue,
                &self.exchange,
                &self.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::setup_failed(
                    "bind_work_queue",
                    format!(
                        "{} -> {} ({}): {}",
                        self.exchange, self.work_queue, self.routing_key, e
                    ),
                )
            })?;

        info!(
            exchange = %self.exchange,
            queue = %self.work_queue,
            dlq = %self.dead_letter_queue,
            routing_key = %self.routing_key,
            "Queue topology declared"
        );

        Ok(())
    }
}
