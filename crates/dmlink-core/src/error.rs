// ── Core error types ──
//
// User-facing errors from dmlink-core. Consumers never see HTTP status
// codes or JSON parse failures directly; the `From<dmlink_api::Error>`
// impl translates wire-layer errors into this taxonomy.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Local, synchronous ───────────────────────────────────────────
    /// Malformed path or tag, unknown child, or a node used as the wrong
    /// kind. Always a programming error; never retried.
    #[error("Addressing error: {message}")]
    Addressing { message: String },

    /// Attempted mutation through a read-only view.
    #[error("Read-only violation: cannot modify '{path}' through a read-only view")]
    ReadOnlyViolation { path: String },

    // ── Remote ───────────────────────────────────────────────────────
    /// The server refused a get/set/execute/subscribe call. The message is
    /// the server's, unchanged.
    #[error("Server rejected {operation}: {message}")]
    RemoteRejection { operation: String, message: String },

    // ── Connection ───────────────────────────────────────────────────
    #[error("Cannot connect to datamodel server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    /// The event stream dropped; subscriptions of this session are invalid.
    #[error("Event stream disconnected: {reason}")]
    StreamDisconnected { reason: String },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn addressing(message: impl Into<String>) -> Self {
        Self::Addressing {
            message: message.into(),
        }
    }

    pub fn is_addressing(&self) -> bool {
        matches!(self, Self::Addressing { .. })
    }

    pub fn is_read_only_violation(&self) -> bool {
        matches!(self, Self::ReadOnlyViolation { .. })
    }

    pub fn is_remote_rejection(&self) -> bool {
        matches!(self, Self::RemoteRejection { .. })
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<dmlink_api::Error> for CoreError {
    fn from(err: dmlink_api::Error) -> Self {
        match err {
            dmlink_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                }
            }
            dmlink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            dmlink_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            dmlink_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            dmlink_api::Error::Unauthorized { message } => CoreError::Unauthorized { message },
            dmlink_api::Error::Rejected { operation, message } => {
                CoreError::RemoteRejection { operation, message }
            }
            dmlink_api::Error::WebSocketConnect(reason) => CoreError::StreamDisconnected {
                reason: format!("WebSocket connection failed: {reason}"),
            },
            dmlink_api::Error::WebSocketClosed { code, reason } => {
                CoreError::StreamDisconnected {
                    reason: format!("WebSocket closed (code {code}): {reason}"),
                }
            }
            dmlink_api::Error::StreamEnded(reason) => CoreError::StreamDisconnected { reason },
            dmlink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
