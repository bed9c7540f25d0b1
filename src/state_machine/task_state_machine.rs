use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    states::TaskStatus,
};
use crate::repository::{RepositoryError, TaskRepository};

/// Task lifecycle guard backed by the task repository
///
/// The current state is always read from the repository, so several state
/// machines for the same task observe each other's transitions.
pub struct TaskStateMachine {
    task_id: Uuid,
    repository: Arc<dyn TaskRepository>,
}

impl TaskStateMachine {
    /// Create a new task state machine instance
    pub fn new(task_id: Uuid, repository: Arc<dyn TaskRepository>) -> Self {
        Self {
            task_id,
            repository,
        }
    }

    /// Get the current state of the task
    pub async fn current_state(&self) -> StateMachineResult<TaskStatus> {
        let task = self.repository.get_by_id(self.task_id).await?;
        Ok(task.status)
    }

    /// Attempt to transition the task state
    ///
    /// Persists the target state, and the error message for `Fail`, with a
    /// compare-and-set against the state that was read. Illegal pairs, and
    /// tasks moved by another writer in between, leave the task untouched.
    pub async fn transition(&self, event: TaskEvent) -> StateMachineResult<TaskStatus> {
        let current_state = self.current_state().await?;
        let target_state = match Self::determine_target_state(current_state, &event) {
            Ok(target) => target,
            Err(e) => {
                warn!(
                    task_id = %self.task_id,
                    from = %current_state,
                    event = event.event_type(),
                    "Rejected task transition"
                );
                return Err(e);
            }
        };

        match self
            .repository
            .transition_status(
                self.task_id,
                current_state,
                target_state,
                event.error_message(),
            )
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::StatusConflict { actual, .. }) => {
                warn!(
                    task_id = %self.task_id,
                    expected = %current_state,
                    actual = %actual,
                    event = event.event_type(),
                    "Task changed state concurrently, transition rejected"
                );
                return Err(StateMachineError::InvalidTransition {
                    from: actual,
                    event: event.event_type().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        debug!(
            task_id = %self.task_id,
            from = %current_state,
            to = %target_state,
            event = event.event_type(),
            "Task transitioned"
        );

        Ok(target_state)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskStatus,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskStatus> {
        let target = match (current_state, event) {
            (TaskStatus::Pending, TaskEvent::Start) => TaskStatus::Processing,

            (TaskStatus::Processing, TaskEvent::Complete) => TaskStatus::Completed,

            (TaskStatus::Processing, TaskEvent::Fail(_)) => TaskStatus::Failed,
            (TaskStatus::Pending, TaskEvent::Fail(_)) => TaskStatus::Failed,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Check if the task is in a terminal state
    pub async fn is_terminal(&self) -> StateMachineResult<bool> {
        let current_state = self.current_state().await?;
        Ok(current_state.is_terminal())
    }

    /// Get task ID
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}
