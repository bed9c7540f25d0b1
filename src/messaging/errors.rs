//! # Messaging Error Types
//!
//! Error taxonomy for the task dispatch pipeline. Each variant maps to one
//! handling policy:
//!
//! - `InvalidMessage` / `MalformedMessage`: never retried, dead-lettered on consume
//! - `PublishFailed`: propagated to the caller, no internal retry
//! - `SetupFailed`: fatal to the owning process
//! - `HandlerFailed`: dead-lettered, the handler owns the task's `failed` state
//! - `AckFailed` / `CloseFailed`: logged, never escalated on their own

use thiserror::Error;
use uuid::Uuid;

/// Messaging error types
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Publish failed for task {task_id}: {message}")]
    PublishFailed { task_id: Uuid, message: String },

    #[error("Queue setup failed at {step}: {message}")]
    SetupFailed { step: String, message: String },

    #[error("Handler failed for task {task_id}: {message}")]
    HandlerFailed { task_id: Uuid, message: String },

    #[error("Failed to {operation} delivery {delivery_tag}: {message}")]
    AckFailed {
        operation: String,
        delivery_tag: u64,
        message: String,
    },

    #[error("Errors closing queue resources: {}", errors.join("; "))]
    CloseFailed { errors: Vec<String> },

    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Failed to start consuming from {queue_name}: {message}")]
    ConsumeFailed { queue_name: String, message: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },
}

impl MessagingError {
    /// Create an invalid message error
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Create a malformed message error
    pub fn malformed_message(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Create a publish failure wrapping a transport error
    pub fn publish_failed(task_id: Uuid, message: impl Into<String>) -> Self {
        Self::PublishFailed {
            task_id,
            message: message.into(),
        }
    }

    /// Create a topology setup failure
    pub fn setup_failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SetupFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create a handler failure
    pub fn handler_failed(task_id: Uuid, message: impl Into<String>) -> Self {
        Self::HandlerFailed {
            task_id,
            message: message.into(),
        }
    }

    /// Create an ack/nack failure
    pub fn ack_failed(
        operation: impl Into<String>,
        delivery_tag: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::AckFailed {
            operation: operation.into(),
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create an aggregate close failure
    pub fn close_failed(errors: Vec<String>) -> Self {
        Self::CloseFailed { errors }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a consume registration error
    pub fn consume_failed(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConsumeFailed {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Whether the error came from decoding a payload rather than processing it
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMessage { .. } | Self::MalformedMessage { .. }
        )
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
