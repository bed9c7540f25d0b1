//! # Task Queue Trait
//!
//! Provider-agnostic publish/consume contract. A queue client is created once
//! per process, owns its broker resources and is shared by `Arc` between
//! producers and the consumer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::consumer::ConsumerHandle;
use super::errors::MessagingResult;
use super::handler::TaskHandler;

/// Durable task queue with dead-letter handling
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    /// Publish a processing request for `task_id` / `image_id`
    ///
    /// Fails with `InvalidMessage` before any I/O when an identifier is nil,
    /// with `PublishFailed` on transport errors and with `Cancelled` when
    /// `cancel` fires while the publish is in flight. No internal retry.
    async fn publish_task(
        &self,
        task_id: Uuid,
        image_id: Uuid,
        cancel: &CancellationToken,
    ) -> MessagingResult<()>;

    /// Subscribe `handler` to the work queue
    ///
    /// Returns once the subscription is registered; deliveries are processed
    /// on a background task owned by the returned handle.
    async fn consume_tasks(
        &self,
        handler: Arc<dyn TaskHandler>,
        cancel: &CancellationToken,
    ) -> MessagingResult<ConsumerHandle>;

    /// Release broker resources, reporting every failure
    async fn close(&self) -> MessagingResult<()>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
