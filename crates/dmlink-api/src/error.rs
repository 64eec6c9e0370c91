use thiserror::Error;

/// Top-level error type for the `dmlink-api` crate.
///
/// Covers every failure mode of the wire layer: HTTP transport, the
/// response envelope, the event WebSocket, and payload decoding.
/// `dmlink-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server answered 401/403.
    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    // ── Server ──────────────────────────────────────────────────────
    /// The server refused the call (parsed from the `{meta: {rc, msg}}` envelope).
    ///
    /// `operation` names the RPC (e.g. `"set_state"`), `message` is the
    /// server's own error text, passed through unchanged.
    #[error("Server rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    // ── Event stream ────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The in-process stream was torn down by its producer.
    #[error("Event stream ended: {0}")]
    StreamEnded(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the server itself refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Returns `true` if this error means the event stream is gone.
    pub fn is_stream_loss(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::StreamEnded(_)
        )
    }

    /// Returns `true` for transport failures that never reached the server.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::Tls(_) => true,
            _ => false,
        }
    }

    pub(crate) fn rejected(operation: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.to_owned(),
            message: message.into(),
        }
    }
}
