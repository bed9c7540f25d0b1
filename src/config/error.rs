//! Configuration Error Types
//!
//! Errors raised while loading and validating the pipeline configuration.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// A development default was left in place for a protected environment
    #[error("Insecure value for '{field}' is not allowed in the {environment} environment")]
    InsecureDefault { field: String, environment: String },

    /// Sources could not be read, merged or deserialized
    #[error("Failed to load configuration: {error}")]
    LoadFailed { error: String },
}

impl ConfigurationError {
    /// Create a missing required field error
    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn insecure_default<F: Into<String>, E: Into<String>>(field: F, environment: E) -> Self {
        Self::InsecureDefault {
            field: field.into(),
            environment: environment.into(),
        }
    }

    pub fn load_failed<E: std::fmt::Display>(error: E) -> Self {
        Self::LoadFailed {
            error: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => {
                Self::missing_required_field(key, "configuration sources")
            }
            other => Self::load_failed(other),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
