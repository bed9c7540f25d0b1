// Task lifecycle: states, events and the repository-backed state machine
// that validates and persists transitions.

pub mod errors;
pub mod events;
pub mod states;
pub mod task_state_machine;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use states::{ImageStatus, TaskStatus};
pub use task_state_machine::TaskStateMachine;
