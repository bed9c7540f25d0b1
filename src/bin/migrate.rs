//! # Image Pipeline Migrations
//!
//! Applies or reverts the embedded schema migrations against the configured
//! PostgreSQL database.
//!
//! ## Usage
//!
//! ```bash
//! # Apply pending migrations
//! cargo run --bin image-pipeline-migrate -- up
//!
//! # Revert the newest migration
//! cargo run --bin image-pipeline-migrate -- down
//!
//! # Revert everything newer than a given version (0 drops the schema)
//! cargo run --bin image-pipeline-migrate -- down --target 0
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use image_pipeline::config::ConfigLoader;
use image_pipeline::database;
use image_pipeline::logging;

#[derive(Parser)]
#[command(name = "image-pipeline-migrate")]
#[command(about = "Apply or revert image pipeline schema migrations")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply every pending migration
    Up,

    /// Revert applied migrations
    Down {
        /// Keep migrations up to and including this version (default: all but the newest)
        #[arg(short, long)]
        target: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    logging::init_with_level(&config.backend.env, &config.backend.log_level);

    let pool = database::connect(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;

    let result = match cli.command {
        Commands::Up => database::migrate(&pool)
            .await
            .context("failed to apply database migrations"),
        Commands::Down { target } => {
            let target = target.unwrap_or_else(database::previous_version);
            info!(target_version = target, "Reverting database migrations");
            database::rollback(&pool, target)
                .await
                .context("failed to revert database migrations")
        }
    };

    pool.close().await;
    result
}
