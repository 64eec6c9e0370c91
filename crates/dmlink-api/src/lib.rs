// dmlink-api: Async Rust client for remote datamodel servers (RPC surface, HTTP + WebSocket)

pub mod client;
pub mod error;
pub mod rpc;
pub mod stream;
pub mod transport;
pub mod types;

pub use client::HttpDatamodelClient;
pub use error::Error;
pub use rpc::{DatamodelRpc, EventStream};
pub use types::{
    CommandInfo, EventDescriptor, EventKind, EventPayload, EventRequest, ParameterInfo,
    StreamMessage, SubscriptionResult, SubscriptionStatus, TypeInfo, ValueType,
};
