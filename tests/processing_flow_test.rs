//! Upload to processed image, through the queue and the worker handler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use image_pipeline::messaging::TaskQueue;
use image_pipeline::repository::{ImageRepository, TaskRepository};
use image_pipeline::services::{ImageProcessingHandler, PassthroughProcessor, UploadService};
use image_pipeline::storage::{FilesystemStorage, ObjectStorage};
use image_pipeline::{ImageStatus, PipelineError, TaskStatus};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const UPLOADS: &str = "uploads";
const PROCESSED: &str = "processed";

struct Harness {
    pipeline: InMemoryPipeline,
    storage: Arc<FilesystemStorage>,
    uploads: UploadService,
    handler: Arc<ImageProcessingHandler>,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FilesystemStorage::new(
        dir.path(),
        "http://localhost:9000",
        "test-secret",
        Duration::from_secs(3600),
    ));
    storage.ensure_bucket_exists(UPLOADS).await.unwrap();
    storage.ensure_bucket_exists(PROCESSED).await.unwrap();

    let pipeline = InMemoryPipeline::new();
    let uploads = UploadService::new(
        storage.clone(),
        Arc::new(pipeline.images.clone()),
        Arc::new(pipeline.tasks.clone()),
        Arc::new(pipeline.queue.clone()),
        UPLOADS,
    );
    let handler = Arc::new(ImageProcessingHandler::new(
        Arc::new(pipeline.tasks.clone()),
        Arc::new(pipeline.images.clone()),
        Arc::new(PassthroughProcessor::new(storage.clone(), UPLOADS, PROCESSED)),
    ));

    Harness {
        pipeline,
        storage,
        uploads,
        handler,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_upload_is_processed_end_to_end() {
    let h = harness().await;
    let cancel = CancellationToken::new();

    let receipt = h
        .uploads
        .register_upload("cat.png", b"\x89PNG-bytes", "image/png", &cancel)
        .await
        .unwrap();

    let consumer = h
        .pipeline
        .queue
        .consume_tasks(h.handler.clone(), &cancel)
        .await
        .unwrap();
    assert!(wait_until(|| h.pipeline.queue.totals().1 == 1).await);
    let stats = consumer.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(stats.acked, 1);

    let task = h.pipeline.tasks.get_by_id(receipt.task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let image = h.pipeline.images.get_by_id(receipt.image.id).await.unwrap();
    assert_eq!(image.status, ImageStatus::Completed);
    let processed_url = image.processed_url.unwrap();
    let (bucket, object) = h.storage.verify_signed_url(&processed_url).unwrap();
    assert_eq!(bucket, PROCESSED);
    assert_eq!(object, receipt.image.id.to_string());

    let processed = h.storage.download_file(PROCESSED, &object).await.unwrap();
    assert_eq!(processed, b"\x89PNG-bytes".to_vec());
    assert_eq!(h.pipeline.queue.dead_letter_len(), 0);
}

#[tokio::test]
async fn test_empty_upload_fails_and_is_dead_lettered() {
    let h = harness().await;
    let cancel = CancellationToken::new();

    let receipt = h
        .uploads
        .register_upload("empty.png", b"", "image/png", &cancel)
        .await
        .unwrap();

    let consumer = h
        .pipeline
        .queue
        .consume_tasks(h.handler.clone(), &cancel)
        .await
        .unwrap();
    assert!(wait_until(|| h.pipeline.queue.dead_letter_len() == 1).await);
    let stats = consumer.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(stats.rejected_handler, 1);

    let task = h.pipeline.tasks.get_by_id(receipt.task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("image is empty")));

    let image = h.pipeline.images.get_by_id(receipt.image.id).await.unwrap();
    assert_eq!(image.status, ImageStatus::Failed);
    assert!(image.processed_url.is_none());

    let dead = h.pipeline.queue.dead_letters();
    assert_eq!(dead[0].envelope().unwrap().task_id, receipt.task.id);
}

#[tokio::test]
async fn test_failed_image_can_be_reprocessed() {
    let h = harness().await;
    let cancel = CancellationToken::new();

    let receipt = h
        .uploads
        .register_upload("empty.png", b"", "image/png", &cancel)
        .await
        .unwrap();
    let consumer = h
        .pipeline
        .queue
        .consume_tasks(h.handler.clone(), &cancel)
        .await
        .unwrap();
    assert!(wait_until(|| h.pipeline.queue.dead_letter_len() == 1).await);

    h.storage
        .upload_file(UPLOADS, &receipt.image.id.to_string(), b"fixed", "image/png")
        .await
        .unwrap();
    let retry = h
        .uploads
        .schedule_processing(receipt.image.id, &cancel)
        .await
        .unwrap();

    assert!(wait_until(|| h.pipeline.queue.totals().1 == 1).await);
    consumer.shutdown(Duration::from_secs(2)).await.unwrap();

    assert_eq!(
        h.pipeline.tasks.get_by_id(retry.id).await.unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(
        h.pipeline.tasks.get_by_image_id(receipt.image.id).await.unwrap().id,
        retry.id
    );
    assert_eq!(
        h.pipeline
            .images
            .get_by_id(receipt.image.id)
            .await
            .unwrap()
            .status,
        ImageStatus::Completed
    );
}

#[tokio::test]
async fn test_schedule_refused_while_task_queued() {
    let h = harness().await;
    let cancel = CancellationToken::new();

    let receipt = h
        .uploads
        .register_upload("cat.png", b"bytes", "image/png", &cancel)
        .await
        .unwrap();

    let err = h
        .uploads
        .schedule_processing(receipt.image.id, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::TaskInProgress { .. }));
    assert_eq!(h.pipeline.queue.work_queue_len(), 1);
}
