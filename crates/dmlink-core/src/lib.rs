//! Proxy object graph over a remote datamodel tree.
//!
//! This crate sits between `dmlink-api` (the RPC surface) and consumers
//! such as the workflow layer and the CLI:
//!
//! - **[`Session`]**: One backend connection. Owns the schema cache, the
//!   [`SubscriptionRegistry`] and, once something subscribes, the event
//!   stream and its dispatcher task. [`Session::close`] tears it all down.
//!
//! - **Nodes** ([`node`]): Typed views over one path: [`ObjectNode`],
//!   [`NamedObjectContainer`], [`ParameterNode`] and [`CommandNode`], each
//!   exposing only the capabilities ([`Readable`], [`Writable`],
//!   [`Invocable`], [`ContainerOf`]) its kind supports.
//!
//! - **Events**: `on_*` methods register callbacks under an [`EventTag`].
//!   Callbacks sharing a tag share one remote subscription. Releasing a
//!   node ([`ObjectNode::release`]) drops every subscription under it.
//!
//! - **[`ReadOnly`]**: A view that can read but never write.
//!
//! - **[`InMemoryDatamodel`]**: An in-process backend for offline use and
//!   tests.

mod cache;
mod call;
pub mod config;
mod dispatch;
pub mod error;
pub mod event;
pub mod memory;
pub mod node;
pub mod path;
pub mod readonly;
pub mod registry;
pub mod session;
pub mod stream;
pub mod tag;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{SessionConfig, TlsVerification};
pub use error::CoreError;
pub use event::{Event, StateDiff};
pub use memory::{CallCounts, CommandContext, InMemoryDatamodel};
pub use node::{
    Child, CommandNode, ContainerOf, Invocable, NamedObjectContainer, NodeKind, ObjectNode,
    ParameterNode, Readable, Writable,
};
pub use path::{DatamodelPath, PathSegment};
pub use readonly::ReadOnly;
pub use registry::{Callback, SubscriptionId, SubscriptionRegistry};
pub use session::{ConnectionState, Session, Subscription};
pub use stream::EventStream;
pub use tag::{EventTag, EventTarget};

// Wire types consumers need alongside the core API.
pub use dmlink_api::{EventKind, EventPayload, TypeInfo, ValueType};
