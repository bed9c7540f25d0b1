//! # System Constants
//!
//! Broker wire contract and status vocabulary shared by producers and consumers.
//! Producers and consumers in separate processes must agree on every name here.

// Re-export status types for convenience
pub use crate::state_machine::{ImageStatus, TaskStatus};

/// Names that make up the broker topology
pub mod topology {
    /// Direct exchange that receives every processing request
    pub const EXCHANGE_NAME: &str = "image_processing_exchange";
    /// Durable work queue bound to the exchange
    pub const QUEUE_NAME: &str = "image_processing";
    /// Durable dead-letter queue for rejected deliveries
    pub const DLQ_NAME: &str = "image_processing.dlq";
    /// Routing key binding the work queue to the exchange
    pub const ROUTING_KEY: &str = "image.processing";

    /// Queue argument naming the exchange used for dead-lettering
    pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
    /// Queue argument naming the routing key used for dead-lettering
    pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";
    /// The default (nameless) exchange routes by queue name
    pub const DEFAULT_EXCHANGE: &str = "";
}

/// Message publishing properties
pub mod publishing {
    /// Content type of every envelope
    pub const CONTENT_TYPE_JSON: &str = "application/json";
    /// AMQP delivery mode 2 marks a message persistent
    pub const DELIVERY_MODE_PERSISTENT: u8 = 2;
    /// At most one unacknowledged delivery per consumer
    pub const PREFETCH_COUNT: u16 = 1;
    /// Consumer tag prefix; the broker sees `<prefix>-<uuid>`
    pub const CONSUMER_TAG_PREFIX: &str = "image-pipeline-worker";
}

/// System-wide defaults
pub mod system {
    /// Connection name reported to the broker
    pub const CONNECTION_NAME: &str = "image-pipeline";
    /// Default grace period when stopping a consumer
    pub const CONSUMER_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
    /// Environment variable selecting the deployment environment
    pub const ENVIRONMENT_VAR: &str = "IMAGE_PIPELINE_ENV";
    /// Fallback environment variable
    pub const FALLBACK_ENVIRONMENT_VAR: &str = "APP_ENV";
    /// Environment used when none is configured
    pub const DEFAULT_ENVIRONMENT: &str = "development";
}
