//! # Task Handler
//!
//! The consumer invokes one handler per validated delivery. Returning `Ok`
//! acknowledges the delivery; returning `Err` dead-letters it. A handler that
//! fails is expected to have recorded the task's `failed` state first.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use uuid::Uuid;

use super::errors::MessagingResult;

/// Processing logic applied to every delivered task
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Process one task
    async fn handle(&self, task_id: Uuid, image_id: Uuid) -> MessagingResult<()>;

    /// A name for the handler, used for logging
    fn handler_name(&self) -> &str {
        "task_handler"
    }
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnTaskHandler<F, Fut> {
    name: String,
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnTaskHandler<F, Fut>
where
    F: Fn(Uuid, Uuid) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnTaskHandler<F, Fut>
where
    F: Fn(Uuid, Uuid) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    async fn handle(&self, task_id: Uuid, image_id: Uuid) -> MessagingResult<()> {
        (self.func)(task_id, image_id).await
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Build a handler from an async closure
pub fn handler_fn<F, Fut>(name: impl Into<String>, func: F) -> FnTaskHandler<F, Fut>
where
    F: Fn(Uuid, Uuid) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    FnTaskHandler::new(name, func)
}
