//! The RPC surface every datamodel backend implements.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::types::{EventDescriptor, StreamMessage, SubscriptionResult, TypeInfo};

/// Server-pushed sequence of event messages, open for a session's lifetime.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamMessage, Error>> + Send>>;

/// Remote datamodel operations, independent of any wire protocol.
///
/// Every call is addressed by a rules namespace plus an encoded path.
/// Implementations never retry; a refused call is reported as
/// [`Error::Rejected`] with the server's message unchanged.
#[async_trait]
pub trait DatamodelRpc: Send + Sync {
    /// Static type description of the namespace root.
    async fn get_static_info(&self, rules: &str) -> Result<TypeInfo, Error>;

    async fn get_state(&self, rules: &str, path: &str, explicit_only: bool)
    -> Result<Value, Error>;

    async fn set_state(&self, rules: &str, path: &str, state: Value) -> Result<(), Error>;

    async fn get_attribute_value(
        &self,
        rules: &str,
        path: &str,
        attribute: &str,
    ) -> Result<Value, Error>;

    async fn execute_command(
        &self,
        rules: &str,
        path: &str,
        command: &str,
        args: Map<String, Value>,
    ) -> Result<Value, Error>;

    async fn delete_object(&self, rules: &str, path: &str) -> Result<(), Error>;

    async fn subscribe_events(
        &self,
        rules: &str,
        events: Vec<EventDescriptor>,
    ) -> Result<Vec<SubscriptionResult>, Error>;

    async fn unsubscribe_events(
        &self,
        rules: &str,
        tags: Vec<String>,
    ) -> Result<Vec<SubscriptionResult>, Error>;

    /// Open the session's event stream.
    async fn begin_streaming(&self) -> Result<EventStream, Error>;
}
