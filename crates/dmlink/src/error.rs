//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError`, `WorkflowError` and `ConfigError` into user-facing
//! errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use dmlink_config::ConfigError;
use dmlink_core::CoreError;
use dmlink_workflow::WorkflowError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const READ_ONLY: i32 = 5;
    pub const TASK_FAILED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to datamodel server at {url}")]
    #[diagnostic(
        code(dmlink::connection_failed),
        help(
            "Check that the server is running and reachable.\n\
             URL: {url}\n\
             Try: dmlink --server memory:// workflow tasks"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Event stream lost: {reason}")]
    #[diagnostic(
        code(dmlink::stream_lost),
        help("Every subscription of this session is gone. Run the command again.")
    )]
    StreamLost { reason: String },

    #[error("Not authorized by the server")]
    #[diagnostic(
        code(dmlink::unauthorized),
        help(
            "Pass --token, set DMLINK_TOKEN, or store one with:\n\
             dmlink config init --url <URL> --save-token <TOKEN>"
        )
    )]
    Unauthorized { message: String },

    // ── Addressing ───────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(dmlink::addressing),
        help("Run: dmlink schema  to see the paths this namespace declares")
    )]
    Addressing { message: String },

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(dmlink::not_found),
        help("Run: dmlink {list_command} to see what exists")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Cannot modify '{path}': read-only")]
    #[diagnostic(code(dmlink::read_only))]
    ReadOnly { path: String },

    // ── Remote ───────────────────────────────────────────────────────
    #[error("Server rejected {operation}: {message}")]
    #[diagnostic(code(dmlink::rejected))]
    Rejected { operation: String, message: String },

    // ── Workflow ─────────────────────────────────────────────────────
    #[error("Task '{task}' failed")]
    #[diagnostic(code(dmlink::task_failed))]
    TaskFailed {
        task: String,
        /// The task's error list, one per line.
        #[help]
        errors: String,
    },

    #[error("{message}")]
    #[diagnostic(code(dmlink::workflow))]
    Workflow { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(dmlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(dmlink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: dmlink config init --url <URL> --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(dmlink::no_config),
        help(
            "Pass --server <URL>, or create a profile with: dmlink config init --url <URL>\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(dmlink::config))]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(dmlink::timeout),
        help("Increase timeout with --timeout or check server responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(dmlink::json), help("Quote the value for your shell, e.g. '{{\"Mode\": \"auto\"}}'"))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(dmlink::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::StreamLost { .. } => exit_code::CONNECTION,
            Self::Unauthorized { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::ReadOnly { .. } => exit_code::READ_ONLY,
            Self::TaskFailed { .. } => exit_code::TASK_FAILED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Addressing { .. }
            | Self::Validation { .. }
            | Self::NoConfig { .. }
            | Self::Json(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Addressing { message } => CliError::Addressing { message },

            CoreError::ReadOnlyViolation { path } => CliError::ReadOnly { path },

            CoreError::RemoteRejection { operation, message } => {
                CliError::Rejected { operation, message }
            }

            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },

            CoreError::Unauthorized { message } => CliError::Unauthorized { message },

            CoreError::StreamDisconnected { reason } => CliError::StreamLost { reason },

            CoreError::SessionClosed => CliError::StreamLost {
                reason: "session closed".into(),
            },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── WorkflowError → CliError mapping ─────────────────────────────────

impl From<WorkflowError> for CliError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Core(e) => e.into(),
            WorkflowError::UnknownTask { task } => CliError::NotFound {
                resource_type: "task".into(),
                identifier: task,
                list_command: "workflow tasks".into(),
            },
            other => CliError::Workflow {
                message: other.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => {
                let cfg = dmlink_config::load_config_or_default();
                let available = cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ");
                CliError::ProfileNotFound {
                    name: profile,
                    available: if available.is_empty() {
                        "(none)".into()
                    } else {
                        available
                    },
                }
            }
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_keep_their_exit_codes() {
        let read_only: CliError = CoreError::ReadOnlyViolation {
            path: "TaskObject:TaskObject1/Arguments".into(),
        }
        .into();
        assert_eq!(read_only.exit_code(), exit_code::READ_ONLY);

        let timeout: CliError = CoreError::Timeout { timeout_secs: 5 }.into();
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);

        let addressing: CliError = CoreError::Addressing {
            message: "no child 'Nope'".into(),
        }
        .into();
        assert_eq!(addressing.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let err: CliError = WorkflowError::UnknownTask {
            task: "Mesh It".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert_eq!(err.to_string(), "task 'Mesh It' not found");
    }
}
