// ── Workflow error types ──
//
// Hard failures only. A task whose validation fails is not an error: its
// messages come back in `TaskOutcome::errors`.

use dmlink_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Composite tasks only group other tasks.
    #[error("Task '{task}' is a composite task and cannot be executed")]
    NotExecutable { task: String },

    #[error("Task '{task}' has no command binding")]
    MissingCommand { task: String },

    #[error("No task '{task}' in the workflow")]
    UnknownTask { task: String },

    #[error("Task '{task}' does not support {operation}")]
    UnsupportedOperation { task: String, operation: String },

    /// Data dependencies among siblings form a cycle.
    #[error("Dependency cycle among tasks: {}", tasks.join(", "))]
    DependencyCycle { tasks: Vec<String> },

    #[error("Invalid data for task '{task}': {message}")]
    InvalidTaskData { task: String, message: String },
}

impl WorkflowError {
    pub(crate) fn invalid(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTaskData {
            task: task.into(),
            message: message.into(),
        }
    }

    /// The wrapped core error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            Self::Core(e) => Some(e),
            _ => None,
        }
    }
}
