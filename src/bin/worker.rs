//! # Image Pipeline Worker
//!
//! Consumes processing tasks from the work queue until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Run against local services with development defaults
//! cargo run --bin image-pipeline-worker
//!
//! # Run with explicit credentials
//! IMAGE_PIPELINE_ENV=production RABBITMQ_USER=pipeline RABBITMQ_PASSWORD=... \
//!     cargo run --release --bin image-pipeline-worker
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use image_pipeline::config::ConfigLoader;
use image_pipeline::constants::system::CONSUMER_SHUTDOWN_TIMEOUT_SECONDS;
use image_pipeline::database;
use image_pipeline::logging;
use image_pipeline::messaging::providers::RabbitMqTaskQueue;
use image_pipeline::messaging::{MessagingError, TaskQueue};
use image_pipeline::repository::{PgImageRepository, PgTaskRepository};
use image_pipeline::services::{ImageProcessingHandler, PassthroughProcessor};
use image_pipeline::storage::{FilesystemStorage, ObjectStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loader = ConfigLoader::new();
    let config = loader.load().context("failed to load configuration")?;

    logging::init_with_level(&config.backend.env, &config.backend.log_level);

    info!("Starting image pipeline worker");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", config.backend.env);
    info!("   Broker: {}", config.rabbitmq.redacted_url());

    let pool = database::connect(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    database::migrate(&pool)
        .await
        .context("failed to apply database migrations")?;

    let storage = Arc::new(FilesystemStorage::from_config(&config.storage));
    for bucket in [&config.storage.bucket_uploads, &config.storage.bucket_processed] {
        storage
            .ensure_bucket_exists(bucket)
            .await
            .with_context(|| format!("failed to prepare bucket {bucket}"))?;
    }

    let tasks = Arc::new(PgTaskRepository::new(pool.clone()));
    let images = Arc::new(PgImageRepository::new(pool.clone()));
    let processor = Arc::new(PassthroughProcessor::new(
        storage,
        config.storage.bucket_uploads.clone(),
        config.storage.bucket_processed.clone(),
    ));

    let queue = RabbitMqTaskQueue::connect(&config.rabbitmq)
        .await
        .context("failed to set up RabbitMQ")?;

    let cancel = CancellationToken::new();
    let handler = Arc::new(ImageProcessingHandler::new(tasks, images, processor));
    let consumer = queue
        .consume_tasks(handler, &cancel)
        .await
        .context("failed to subscribe to the work queue")?;

    info!("Worker started, press Ctrl+C to shut down");

    let consumer_died = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping consumer");
            false
        }
        _ = consumer.stopped() => {
            error!(
                queue = consumer.queue_name(),
                "Consumer exited before shutdown was requested"
            );
            true
        }
    };
    cancel.cancel();

    match consumer
        .shutdown(Duration::from_secs(CONSUMER_SHUTDOWN_TIMEOUT_SECONDS))
        .await
    {
        Ok(stats) => info!(
            received = stats.received,
            acked = stats.acked,
            rejected_malformed = stats.rejected_malformed,
            rejected_handler = stats.rejected_handler,
            settle_failures = stats.settle_failures,
            "Consumer stopped"
        ),
        Err(e) => warn!(error = %e, "Consumer did not stop cleanly"),
    }

    if let Err(e) = queue.close().await {
        match e {
            MessagingError::CloseFailed { errors } => {
                for close_error in errors {
                    error!(error = %close_error, "Failed to release broker resource");
                }
            }
            other => error!(error = %other, "Failed to close queue"),
        }
    }

    pool.close().await;

    if consumer_died {
        anyhow::bail!("consumer stopped unexpectedly");
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
