// HTTP binding of the datamodel RPC surface
//
// Wraps `reqwest::Client` with URL construction, envelope unwrapping and
// the WebSocket stream endpoint. Every unary RPC is a JSON POST to
// `{base}/datamodel/{rules}/{operation}`.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::rpc::{DatamodelRpc, EventStream};
use crate::stream;
use crate::transport::TransportConfig;
use crate::types::{EventDescriptor, SubscriptionResult, TypeInfo};

/// Raw HTTP client for a datamodel server.
///
/// Handles the `{ meta: { rc, msg }, data }` envelope. All methods return
/// unwrapped `data` payloads; the envelope is stripped before the caller
/// sees it.
pub struct HttpDatamodelClient {
    http: reqwest::Client,
    base_url: Url,
    bearer: Option<String>,
}

impl HttpDatamodelClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the server root (e.g. `http://127.0.0.1:7410`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            bearer: transport.bearer(),
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            bearer: None,
        }
    }

    /// The server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/datamodel/{rules}/{operation}`
    pub(crate) fn rpc_url(&self, rules: &str, operation: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/datamodel/{rules}/{operation}",
            self.base_url.as_str().trim_end_matches('/')
        );
        Ok(Url::parse(&full)?)
    }

    /// `ws(s)://{host}/datamodel/stream`, derived from the base URL scheme.
    pub(crate) fn stream_url(&self) -> Result<Url, Error> {
        let scheme = match self.base_url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        let rest = self
            .base_url
            .as_str()
            .split_once("://")
            .map_or("", |(_, rest)| rest)
            .trim_end_matches('/');
        Ok(Url::parse(&format!("{scheme}://{rest}/datamodel/stream"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// POST a JSON body and unwrap the envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        rules: &str,
        operation: &str,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        let url = self.rpc_url(rules, operation)?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_envelope(operation, resp).await
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct Envelope {
    meta: Meta,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, serde::Deserialize)]
struct Meta {
    rc: String,
    #[serde(default)]
    msg: Option<String>,
}

/// Parse the `{ meta, data }` envelope, returning `data` on success
/// or `Error::Rejected` if `meta.rc != "ok"`.
async fn parse_envelope<T: DeserializeOwned>(
    operation: &str,
    resp: reqwest::Response,
) -> Result<T, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Unauthorized {
            message: format!("HTTP {status} from {operation}"),
        });
    }

    let body = resp.text().await.map_err(Error::Transport)?;
    decode_envelope(operation, &body)
}

fn decode_envelope<T: DeserializeOwned>(operation: &str, body: &str) -> Result<T, Error> {
    let envelope: Envelope = serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: body.to_owned(),
    })?;

    if envelope.meta.rc != "ok" {
        return Err(Error::rejected(
            operation,
            envelope
                .meta
                .msg
                .unwrap_or_else(|| format!("rc={}", envelope.meta.rc)),
        ));
    }

    serde_json::from_value(envelope.data).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: body.to_owned(),
    })
}

// ── Request bodies ───────────────────────────────────────────────────

#[derive(Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct GetStateRequest<'a> {
    path: &'a str,
    explicit_only: bool,
}

#[derive(Serialize)]
struct SetStateRequest<'a> {
    path: &'a str,
    state: Value,
}

#[derive(Serialize)]
struct AttributeRequest<'a> {
    path: &'a str,
    attribute: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    path: &'a str,
    command: &'a str,
    args: Map<String, Value>,
}

#[derive(Serialize)]
struct SubscribeRequest {
    events: Vec<EventDescriptor>,
}

#[derive(Serialize)]
struct UnsubscribeRequest {
    tags: Vec<String>,
}

// ── RPC implementation ───────────────────────────────────────────────

#[async_trait]
impl DatamodelRpc for HttpDatamodelClient {
    async fn get_static_info(&self, rules: &str) -> Result<TypeInfo, Error> {
        debug!(rules, "fetching static info");
        self.call(rules, "static-info", &Map::new()).await
    }

    async fn get_state(
        &self,
        rules: &str,
        path: &str,
        explicit_only: bool,
    ) -> Result<Value, Error> {
        self.call(
            rules,
            "get-state",
            &GetStateRequest {
                path,
                explicit_only,
            },
        )
        .await
    }

    async fn set_state(&self, rules: &str, path: &str, state: Value) -> Result<(), Error> {
        self.call(rules, "set-state", &SetStateRequest { path, state })
            .await
    }

    async fn get_attribute_value(
        &self,
        rules: &str,
        path: &str,
        attribute: &str,
    ) -> Result<Value, Error> {
        self.call(
            rules,
            "get-attribute-value",
            &AttributeRequest { path, attribute },
        )
        .await
    }

    async fn execute_command(
        &self,
        rules: &str,
        path: &str,
        command: &str,
        args: Map<String, Value>,
    ) -> Result<Value, Error> {
        debug!(rules, path, command, "executing command");
        self.call(
            rules,
            "execute-command",
            &ExecuteRequest {
                path,
                command,
                args,
            },
        )
        .await
    }

    async fn delete_object(&self, rules: &str, path: &str) -> Result<(), Error> {
        self.call(rules, "delete-object", &PathRequest { path })
            .await
    }

    async fn subscribe_events(
        &self,
        rules: &str,
        events: Vec<EventDescriptor>,
    ) -> Result<Vec<SubscriptionResult>, Error> {
        self.call(rules, "subscribe-events", &SubscribeRequest { events })
            .await
    }

    async fn unsubscribe_events(
        &self,
        rules: &str,
        tags: Vec<String>,
    ) -> Result<Vec<SubscriptionResult>, Error> {
        self.call(rules, "unsubscribe-events", &UnsubscribeRequest { tags })
            .await
    }

    async fn begin_streaming(&self) -> Result<EventStream, Error> {
        let url = self.stream_url()?;
        stream::connect(&url, self.bearer.as_deref()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpDatamodelClient {
        HttpDatamodelClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn rpc_url_joins_rules_and_operation() {
        let c = client("http://localhost:7410/");
        assert_eq!(
            c.rpc_url("meshing", "get-state").unwrap().as_str(),
            "http://localhost:7410/datamodel/meshing/get-state"
        );
    }

    #[test]
    fn stream_url_switches_scheme() {
        assert_eq!(
            client("http://localhost:7410").stream_url().unwrap().as_str(),
            "ws://localhost:7410/datamodel/stream"
        );
        assert_eq!(
            client("https://sim.example.com/").stream_url().unwrap().as_str(),
            "wss://sim.example.com/datamodel/stream"
        );
    }

    #[test]
    fn envelope_error_keeps_server_message() {
        let body = r#"{"meta":{"rc":"error","msg":"Workflow type 'Foo' is not accessible"}}"#;
        let err = decode_envelope::<Value>("execute_command", body).unwrap_err();
        match err {
            Error::Rejected { operation, message } => {
                assert_eq!(operation, "execute_command");
                assert_eq!(message, "Workflow type 'Foo' is not accessible");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn envelope_null_data_decodes_as_unit() {
        let body = r#"{"meta":{"rc":"ok"},"data":null}"#;
        decode_envelope::<()>("set_state", body).unwrap();
    }

    #[test]
    fn malformed_body_is_deserialization_error() {
        let err = decode_envelope::<Value>("get_state", "<html>").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }
}
