//! Shared wiring for pipeline tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use image_pipeline::messaging::{handler_fn, InMemoryTaskQueue, MessagingError, TaskHandler};
use image_pipeline::repository::{
    ImageRepository, InMemoryImageRepository, InMemoryTaskRepository, TaskRepository,
};
use image_pipeline::{Image, ProcessingTask};
use parking_lot::Mutex;
use uuid::Uuid;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `WAIT_TIMEOUT` elapses
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Await `future`, failing the test if it takes longer than `WAIT_TIMEOUT`
pub async fn within_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_TIMEOUT, future)
        .await
        .expect("operation timed out")
}

/// Handler invocations recorded in order
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(Uuid, Uuid)>>>);

impl CallLog {
    pub fn record(&self, task_id: Uuid, image_id: Uuid) {
        self.0.lock().push((task_id, image_id));
    }

    pub fn calls(&self) -> Vec<(Uuid, Uuid)> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Handler that records every call and always succeeds
pub fn always_succeed(log: CallLog) -> Arc<dyn TaskHandler> {
    Arc::new(handler_fn("always_succeed", move |task_id, image_id| {
        let log = log.clone();
        async move {
            log.record(task_id, image_id);
            Ok(())
        }
    }))
}

/// Handler that records every call and always fails
pub fn always_fail(log: CallLog) -> Arc<dyn TaskHandler> {
    Arc::new(handler_fn("always_fail", move |task_id, image_id| {
        let log = log.clone();
        async move {
            log.record(task_id, image_id);
            Err(MessagingError::handler_failed(task_id, "always fails"))
        }
    }))
}

/// In-memory broker and repositories
pub struct InMemoryPipeline {
    pub queue: InMemoryTaskQueue,
    pub tasks: InMemoryTaskRepository,
    pub images: InMemoryImageRepository,
}

impl InMemoryPipeline {
    pub fn new() -> Self {
        Self {
            queue: InMemoryTaskQueue::new().expect("topology setup"),
            tasks: InMemoryTaskRepository::new(),
            images: InMemoryImageRepository::new(),
        }
    }

    /// Persist a pending image with one pending task
    pub async fn seed_task(&self) -> ProcessingTask {
        let image = Image::new(format!("http://localhost:9000/uploads/{}", Uuid::new_v4()));
        self.images.create(&image).await.expect("create image");
        let task = ProcessingTask::new(image.id);
        self.tasks.create(&task).await.expect("create task");
        task
    }
}

impl Default for InMemoryPipeline {
    fn default() -> Self {
        Self::new()
    }
}
