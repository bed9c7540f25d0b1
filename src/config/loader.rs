//! # Configuration Loader
//!
//! Layers configuration sources in increasing priority:
//!
//! 1. Development defaults (skipped for credentials in protected environments)
//! 2. `<config_dir>/base.toml` and `<config_dir>/<env>.toml`, both optional
//! 3. Environment variables from [`ENV_BINDINGS`]
//!
//! The merged result is deserialized into [`AppConfig`] and validated.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, File};
use tracing::{debug, info};

use super::{AppConfig, ConfigResult, PROTECTED_ENVIRONMENTS};
use crate::constants::system::{
    CONNECTION_NAME, DEFAULT_ENVIRONMENT, ENVIRONMENT_VAR, FALLBACK_ENVIRONMENT_VAR,
};

/// Signing secret used when none is configured outside protected environments
pub(crate) const DEVELOPMENT_SIGNING_SECRET: &str = "development-signing-secret";

/// Environment variable to configuration key bindings
pub const ENV_BINDINGS: &[(&str, &str)] = &[
    ("RABBITMQ_HOST", "rabbitmq.host"),
    ("RABBITMQ_PORT", "rabbitmq.port"),
    ("RABBITMQ_USER", "rabbitmq.user"),
    ("RABBITMQ_PASSWORD", "rabbitmq.password"),
    ("RABBITMQ_VHOST", "rabbitmq.vhost"),
    ("RABBITMQ_CONNECTION_NAME", "rabbitmq.connection_name"),
    (
        "RABBITMQ_CONNECTION_TIMEOUT_SECONDS",
        "rabbitmq.connection_timeout_seconds",
    ),
    ("POSTGRES_HOST", "database.host"),
    ("POSTGRES_PORT", "database.port"),
    ("POSTGRES_USER", "database.user"),
    ("POSTGRES_PASSWORD", "database.password"),
    ("POSTGRES_DB", "database.name"),
    ("POSTGRES_SSLMODE", "database.sslmode"),
    ("POSTGRES_MAX_OPEN_CONNS", "database.max_connections"),
    ("POSTGRES_MAX_IDLE_CONNS", "database.min_connections"),
    ("POSTGRES_ACQUIRE_TIMEOUT_SECONDS", "database.acquire_timeout_seconds"),
    ("STORAGE_ROOT_DIR", "storage.root_dir"),
    ("STORAGE_PUBLIC_BASE_URL", "storage.public_base_url"),
    ("STORAGE_SIGNING_SECRET", "storage.signing_secret"),
    ("MINIO_BUCKET_UPLOADS", "storage.bucket_uploads"),
    ("MINIO_BUCKET_PROCESSED", "storage.bucket_processed"),
    (
        "MINIO_PRESIGNED_URL_EXPIRATION_HOURS",
        "storage.presigned_url_expiration_hours",
    ),
    ("BACKEND_PORT", "backend.port"),
    ("BACKEND_LOG_LEVEL", "backend.log_level"),
];

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Detect the current environment
///
/// `IMAGE_PIPELINE_ENV`, then `APP_ENV`, then `development`.
pub fn detect_environment() -> String {
    env::var(ENVIRONMENT_VAR)
        .or_else(|_| env::var(FALLBACK_ENVIRONMENT_VAR))
        .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
        .to_lowercase()
}

/// Builder-style loader for [`AppConfig`]
pub struct ConfigLoader {
    environment: String,
    config_dir: Option<PathBuf>,
    env_lookup: EnvLookup,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader for the detected environment reading the process environment
    pub fn new() -> Self {
        Self {
            environment: detect_environment(),
            config_dir: None,
            env_lookup: Box::new(|key| env::var(key).ok()),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into().to_lowercase();
        self
    }

    /// Directory holding optional `base.toml` and `<env>.toml` files
    pub fn with_config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(config_dir.into());
        self
    }

    /// Read environment bindings from a fixed map instead of the process
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_lookup = Box::new(move |key| vars.get(key).cloned());
        self
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Merge all sources, deserialize and validate
    pub fn load(&self) -> ConfigResult<AppConfig> {
        let mut builder = self.defaults()?;

        if let Some(dir) = &self.config_dir {
            let base = dir.join("base.toml");
            let overlay = dir.join(format!("{}.toml", self.environment));
            debug!(base = %base.display(), overlay = %overlay.display(), "Adding configuration files");
            builder = builder
                .add_source(File::from(base).required(false))
                .add_source(File::from(overlay).required(false));
        }

        for (var, key) in ENV_BINDINGS {
            if let Some(value) = (self.env_lookup)(*var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %config.backend.env,
            broker = %config.rabbitmq.redacted_url(),
            database_host = %config.database.host,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn defaults(&self) -> ConfigResult<ConfigBuilder<DefaultState>> {
        let protected = PROTECTED_ENVIRONMENTS.contains(&self.environment.as_str());

        let mut builder = Config::builder()
            .set_default("rabbitmq.host", "localhost")?
            .set_default("rabbitmq.port", 5672)?
            .set_default("rabbitmq.vhost", "/")?
            .set_default("rabbitmq.connection_name", CONNECTION_NAME)?
            .set_default("rabbitmq.connection_timeout_seconds", 10)?
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.user", "postgres")?
            .set_default("database.name", "image_processing")?
            .set_default("database.sslmode", "disable")?
            .set_default("database.max_connections", 25)?
            .set_default("database.min_connections", 5)?
            .set_default("database.acquire_timeout_seconds", 30)?
            .set_default("storage.root_dir", "storage")?
            .set_default("storage.public_base_url", "http://localhost:9000")?
            .set_default("storage.bucket_uploads", "uploads")?
            .set_default("storage.bucket_processed", "processed")?
            .set_default("storage.presigned_url_expiration_hours", 168)?
            .set_default("backend.port", 8080)?
            .set_default("backend.log_level", "info")?
            .set_default("backend.env", self.environment.as_str())?;

        if !protected {
            builder = builder
                .set_default("rabbitmq.user", "guest")?
                .set_default("rabbitmq.password", "guest")?
                .set_default("database.password", "postgres")?
                .set_default("storage.signing_secret", DEVELOPMENT_SIGNING_SECRET)?;
        }

        // The environment is chosen by the loader, never by a file
        builder = builder.set_override("backend.env", self.environment.as_str())?;

        Ok(builder)
    }
}
