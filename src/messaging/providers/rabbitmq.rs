//! # RabbitMQ Task Queue
//!
//! [`TaskQueue`] implementation over AMQP 0.9.1 using the `lapin` crate.
//!
//! ## Features
//!
//! - **Durable topology**: exchange, work queue and DLQ are declared on connect
//! - **Persistent publishing**: delivery mode 2, `application/json` bodies,
//!   each publish waits for the broker's confirm
//! - **Fair dispatch**: prefetch 1 with manual acknowledgements
//! - **Dead letters**: rejected deliveries are nacked without requeue and land
//!   in the DLQ through the work queue's dead-letter arguments
//!
//! One connection and one channel are owned per client. `lapin` serializes
//! frames per channel, so the client may be shared by `Arc` between
//! concurrent publishers and the consumer.
//!
//! ## Usage
//!
//! ```ignore
//! use image_pipeline::config::ConfigLoader;
//! use image_pipeline::messaging::providers::RabbitMqTaskQueue;
//! use image_pipeline::messaging::TaskQueue;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! let queue = RabbitMqTaskQueue::connect(&config.rabbitmq).await?;
//!
//! let cancel = CancellationToken::new();
//! queue.publish_task(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), &cancel).await?;
//! queue.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ConfirmSelectOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RabbitmqConfig;
use crate::constants::publishing::{
    CONSUMER_TAG_PREFIX, CONTENT_TYPE_JSON, DELIVERY_MODE_PERSISTENT, PREFETCH_COUNT,
};
use crate::logging::log_queue_operation;
use crate::messaging::consumer::{AckableDelivery, ConsumerHandle};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::handler::TaskHandler;
use crate::messaging::message::ProcessingMessage;
use crate::messaging::queue::TaskQueue;
use crate::messaging::topology::QueueTopology;

/// AMQP reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// Delivery received from the broker, settled through its acker
pub struct RabbitMqDelivery(Delivery);

#[async_trait]
impl AckableDelivery for RabbitMqDelivery {
    fn payload(&self) -> &[u8] {
        &self.0.data
    }

    fn delivery_tag(&self) -> u64 {
        self.0.delivery_tag
    }

    async fn ack(&self) -> MessagingResult<()> {
        self.0
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::ack_failed("ack", self.0.delivery_tag, e.to_string()))
    }

    async fn reject(&self) -> MessagingResult<()> {
        self.0
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
            .map_err(|e| MessagingError::ack_failed("nack", self.0.delivery_tag, e.to_string()))
    }
}

/// Task queue backed by a RabbitMQ broker
pub struct RabbitMqTaskQueue {
    connection: Connection,
    channel: Channel,
    config: RabbitmqConfig,
    topology: QueueTopology,
    closed: AtomicBool,
}

impl std::fmt::Debug for RabbitMqTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqTaskQueue")
            .field("url", &self.config.redacted_url())
            .field("topology", &self.topology)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl RabbitMqTaskQueue {
    /// Connect with the standard processing topology
    pub async fn connect(config: &RabbitmqConfig) -> MessagingResult<Self> {
        Self::connect_with_topology(config, QueueTopology::default()).await
    }

    /// Connect, open a channel and declare `topology`
    ///
    /// Any failure after the connection is open closes what was opened
    /// before returning; close failures are appended to the reported error.
    pub async fn connect_with_topology(
        config: &RabbitmqConfig,
        topology: QueueTopology,
    ) -> MessagingResult<Self> {
        let amqp_url = config.amqp_url();
        let connect = Connection::connect(
            &amqp_url,
            ConnectionProperties::default()
                .with_connection_name(config.connection_name.clone().into()),
        );

        let connection = tokio::time::timeout(config.connection_timeout(), connect)
            .await
            .map_err(|_| {
                MessagingError::connection(format!(
                    "timed out after {:?} connecting to {}",
                    config.connection_timeout(),
                    config.redacted_url()
                ))
            })?
            .map_err(|e| {
                MessagingError::connection(format!(
                    "RabbitMQ connection to {} failed: {}",
                    config.redacted_url(),
                    e
                ))
            })?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let mut message = format!("RabbitMQ channel creation failed: {e}");
                if let Err(close_err) = connection
                    .close(REPLY_SUCCESS, "channel creation failed")
                    .await
                {
                    message.push_str(&format!("; failed to close connection: {close_err}"));
                }
                return Err(MessagingError::connection(message));
            }
        };

        if let Err(setup_err) = prepare_channel(&channel, &topology).await {
            let close_errors = close_resources(&channel, &connection).await;
            for close_err in &close_errors {
                error!(error = %close_err, "Failed to release broker resources after setup failure");
            }
            return Err(with_cleanup_errors(setup_err, close_errors));
        }

        info!(
            url = %config.redacted_url(),
            exchange = %topology.exchange,
            queue = %topology.work_queue,
            "Connected to RabbitMQ"
        );

        Ok(Self {
            connection,
            channel,
            config: config.clone(),
            topology,
            closed: AtomicBool::new(false),
        })
    }

    /// Re-run topology declaration on the open channel
    pub async fn setup(&self) -> MessagingResult<()> {
        self.topology.declare(&self.channel).await
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self.connection.status().connected()
            && self.channel.status().connected()
    }

    async fn publish_bytes(&self, body: &[u8]) -> Result<Confirmation, lapin::Error> {
        let confirm = self
            .channel
            .basic_publish(
                &self.topology.exchange,
                &self.topology.routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                body,
                BasicProperties::default()
                    .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
                    .with_content_type(CONTENT_TYPE_JSON.into()),
            )
            .await?;

        Ok(confirm.await?)
    }
}

#[async_trait]
impl TaskQueue for RabbitMqTaskQueue {
    async fn publish_task(
        &self,
        task_id: Uuid,
        image_id: Uuid,
        cancel: &CancellationToken,
    ) -> MessagingResult<()> {
        let body = ProcessingMessage::new(task_id, image_id).to_bytes()?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(task_id = %task_id, "Publish cancelled");
                return Err(MessagingError::cancelled("publish_task"));
            }
            result = self.publish_bytes(&body) => {
                let confirmation = result
                    .map_err(|e| MessagingError::publish_failed(task_id, e.to_string()))?;
                require_ack(task_id, &confirmation)?;
            }
        }

        info!(
            task_id = %task_id,
            image_id = %image_id,
            exchange = %self.topology.exchange,
            routing_key = %self.topology.routing_key,
            "Published task"
        );

        Ok(())
    }

    async fn consume_tasks(
        &self,
        handler: Arc<dyn TaskHandler>,
        cancel: &CancellationToken,
    ) -> MessagingResult<ConsumerHandle> {
        let queue = self.topology.work_queue.clone();

        self.channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|e| {
                MessagingError::consume_failed(&queue, format!("failed to set QoS: {e}"))
            })?;

        let consumer_tag = format!("{}-{}", CONSUMER_TAG_PREFIX, Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::consume_failed(&queue, format!("failed to register consumer: {e}"))
            })?;

        debug!(
            queue = %queue,
            consumer_tag = %consumer_tag,
            handler = %handler.handler_name(),
            "Registered consumer"
        );
        log_queue_operation("consume_tasks", &queue, "subscribed", Some(&consumer_tag));

        let deliveries = consumer.map(|result| {
            result.map(RabbitMqDelivery).map_err(|e| {
                MessagingError::connection(format!("delivery stream error: {e}"))
            })
        });

        Ok(ConsumerHandle::spawn(queue, deliveries, handler, cancel))
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let errors = close_resources(&self.channel, &self.connection).await;
        if errors.is_empty() {
            info!(url = %self.config.redacted_url(), "Closed RabbitMQ connection");
        } else {
            let details = errors.join("; ");
            log_queue_operation("close", &self.topology.work_queue, "failed", Some(&details));
        }
        close_outcome(errors)
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

/// Only a broker `ack` counts as a successful publish
fn require_ack(task_id: Uuid, confirmation: &Confirmation) -> MessagingResult<()> {
    if confirmation.is_ack() {
        return Ok(());
    }
    let reason = match confirmation {
        Confirmation::NotRequested => "publisher confirms are not enabled on the channel",
        _ => "broker did not confirm the message",
    };
    Err(MessagingError::publish_failed(task_id, reason))
}

/// Enable publisher confirms, then declare the topology
async fn prepare_channel(channel: &Channel, topology: &QueueTopology) -> MessagingResult<()> {
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| MessagingError::setup_failed("confirm_select", e.to_string()))?;
    topology.declare(channel).await
}

/// A broker-side resource released on shutdown
#[async_trait]
trait BrokerResource: Send + Sync {
    fn kind(&self) -> &'static str;

    fn is_open(&self) -> bool;

    async fn release(&self) -> Result<(), lapin::Error>;
}

#[async_trait]
impl BrokerResource for Channel {
    fn kind(&self) -> &'static str {
        "channel"
    }

    fn is_open(&self) -> bool {
        self.status().connected()
    }

    async fn release(&self) -> Result<(), lapin::Error> {
        self.close(REPLY_SUCCESS, "closing").await
    }
}

#[async_trait]
impl BrokerResource for Connection {
    fn kind(&self) -> &'static str {
        "connection"
    }

    fn is_open(&self) -> bool {
        self.status().connected()
    }

    async fn release(&self) -> Result<(), lapin::Error> {
        self.close(REPLY_SUCCESS, "closing").await
    }
}

/// Close the channel, then the connection, collecting every failure
///
/// Resources that are no longer open are skipped, which makes this safe to
/// call after a partial setup.
async fn close_resources(
    channel: &dyn BrokerResource,
    connection: &dyn BrokerResource,
) -> Vec<String> {
    let mut errors = Vec::new();

    for resource in [channel, connection] {
        if !resource.is_open() {
            continue;
        }
        if let Err(e) = resource.release().await {
            errors.push(format!("failed to close {}: {e}", resource.kind()));
        }
    }

    errors
}

/// Fold release failures into the result of `close`
fn close_outcome(errors: Vec<String>) -> MessagingResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(MessagingError::close_failed(errors))
    }
}

fn with_cleanup_errors(err: MessagingError, cleanup: Vec<String>) -> MessagingError {
    if cleanup.is_empty() {
        return err;
    }

    match err {
        MessagingError::SetupFailed { step, message } => MessagingError::SetupFailed {
            step,
            message: format!("{}; cleanup: {}", message, cleanup.join("; ")),
        },
        other => other,
    }
}
