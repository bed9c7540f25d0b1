use thiserror::Error;

use crate::repository::RepositoryError;

/// Errors raised while moving a task through its lifecycle
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl StateMachineError {
    /// Whether the task row does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Repository(RepositoryError::NotFound { .. }))
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
