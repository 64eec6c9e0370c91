//! WebSocket event stream.
//!
//! Connects to the server's stream endpoint and yields parsed
//! [`StreamMessage`]s in receipt order. There is no reconnect loop: when
//! the socket drops the stream ends (cleanly or with an error) and the
//! caller decides what to do next.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use url::Url;
//!
//! let url = Url::parse("ws://127.0.0.1:7410/datamodel/stream")?;
//! let mut events = dmlink_api::stream::connect(&url, None).await?;
//!
//! while let Some(message) = events.next().await {
//!     let message = message?;
//!     println!("{}: {:?}", message.tag, message.payload);
//! }
//! ```

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use crate::error::Error;
use crate::rpc::EventStream;
use crate::types::StreamMessage;

/// Open the WebSocket and return the message stream.
///
/// If `bearer` is provided it is sent as the `Authorization` header on the
/// upgrade request.
pub async fn connect(url: &Url, bearer: Option<&str>) -> Result<EventStream, Error> {
    tracing::info!(url = %url, "Connecting to event stream");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(value) = bearer {
        request = request.with_header("Authorization", value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("Event stream connected");

    let (write, mut read) = ws_stream.split();

    let stream = async_stream::try_stream! {
        // Held so the sink half lives as long as the reader.
        let _write = write;

        while let Some(frame) = read.next().await {
            match frame.map_err(|e| Error::WebSocketConnect(e.to_string()))? {
                tungstenite::Message::Text(text) => {
                    for message in parse_frame(&text) {
                        yield message;
                    }
                }
                tungstenite::Message::Ping(_) => {
                    tracing::trace!("event stream ping");
                }
                tungstenite::Message::Close(frame) => {
                    if let Some(cf) = frame {
                        tracing::info!(code = %cf.code, reason = %cf.reason, "close frame received");
                        if cf.code != CloseCode::Normal {
                            Err::<(), _>(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.to_string(),
                            })?;
                        }
                    } else {
                        tracing::info!("close frame received (no payload)");
                    }
                    break;
                }
                _ => {
                    // Binary, Pong, Frame -- ignore
                }
            }
        }

        tracing::debug!("event stream finished");
    };

    Ok(Box::pin(stream))
}

// ── Message parsing ──────────────────────────────────────────────────

/// A text frame carries either one message or a JSON array of them.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Frame {
    Batch(Vec<StreamMessage>),
    Single(StreamMessage),
}

/// Parse one text frame. Malformed frames are logged and skipped.
pub(crate) fn parse_frame(text: &str) -> Vec<StreamMessage> {
    match serde_json::from_str::<Frame>(text) {
        Ok(Frame::Batch(messages)) => messages,
        Ok(Frame::Single(message)) => vec![message],
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse event frame");
            Vec::new()
        }
    }
}
