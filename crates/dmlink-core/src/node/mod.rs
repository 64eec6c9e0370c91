// ── Remote proxy nodes ──
//
// A node is a typed view over one path of a remote tree; it never holds
// authoritative state. What a node can do is fixed by its kind, which is
// resolved from the namespace schema when the node is constructed:
//
//   ObjectNode            Readable + Writable, runs its commands
//   NamedObjectContainer  Readable + ContainerOf<ObjectNode>
//   ParameterNode         Readable + Writable
//   CommandNode           Invocable

mod command;
mod container;
mod object;
mod parameter;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use strum::{Display, EnumString};

pub use command::CommandNode;
pub use container::NamedObjectContainer;
pub use object::ObjectNode;
pub use parameter::ParameterNode;

use crate::error::CoreError;
use crate::event::Event;
use crate::path::DatamodelPath;
use crate::session::{Session, Subscription};
use crate::tag::{EventTag, EventTarget};

// ── Capabilities ─────────────────────────────────────────────────

/// Nodes whose state can be read.
#[async_trait]
pub trait Readable: Send + Sync {
    fn rules(&self) -> &str;

    fn path(&self) -> &DatamodelPath;

    /// Explicitly set attributes only (`true`) or the fully resolved,
    /// default-filled state (`false`).
    async fn get_state(&self, explicit_only: bool) -> Result<Value, CoreError>;

    /// A server-side attribute of the node (allowed values, help, ...).
    async fn attribute_value(&self, attribute: &str) -> Result<Value, CoreError>;
}

/// Nodes whose state can be written.
#[async_trait]
pub trait Writable: Readable {
    async fn set_state(&self, value: Value) -> Result<(), CoreError>;
}

/// Nodes that run a remote command.
#[async_trait]
pub trait Invocable: Send + Sync {
    fn command_name(&self) -> &str;

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, CoreError>;
}

/// Named-object containers.
#[async_trait]
pub trait ContainerOf<T>: Send + Sync {
    async fn object_names(&self) -> Result<Vec<String>, CoreError>;

    /// Handle for member `name`. Existence is only checked remotely, on use.
    fn object(&self, name: &str) -> Result<T, CoreError>;

    async fn delete_object(&self, name: &str) -> Result<(), CoreError>;
}

// ── Child resolution ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum NodeKind {
    Object,
    NamedObjectContainer,
    Parameter,
    Command,
}

/// A child of an [`ObjectNode`], as the schema declares it.
#[derive(Debug, Clone)]
pub enum Child {
    Object(ObjectNode),
    Container(NamedObjectContainer),
    Parameter(ParameterNode),
    Command(CommandNode),
}

impl Child {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Object(_) => NodeKind::Object,
            Self::Container(_) => NodeKind::NamedObjectContainer,
            Self::Parameter(_) => NodeKind::Parameter,
            Self::Command(_) => NodeKind::Command,
        }
    }
}

// ── Shared plumbing ──────────────────────────────────────────────

pub(crate) async fn read_state(
    session: &Session,
    rules: &str,
    path: &DatamodelPath,
    explicit_only: bool,
) -> Result<Value, CoreError> {
    let wire = path.encode();
    session
        .call(
            "get_state",
            session.rpc().get_state(rules, &wire, explicit_only),
        )
        .await
}

pub(crate) async fn write_state(
    session: &Session,
    rules: &str,
    path: &DatamodelPath,
    value: Value,
) -> Result<(), CoreError> {
    let wire = path.encode();
    session
        .call("set_state", session.rpc().set_state(rules, &wire, value))
        .await
}

pub(crate) async fn read_attribute(
    session: &Session,
    rules: &str,
    path: &DatamodelPath,
    attribute: &str,
) -> Result<Value, CoreError> {
    let wire = path.encode();
    session
        .call(
            "get_attribute_value",
            session.rpc().get_attribute_value(rules, &wire, attribute),
        )
        .await
}

pub(crate) async fn subscribe_at<F>(
    session: &Session,
    rules: &str,
    path: &DatamodelPath,
    target: EventTarget,
    callback: F,
) -> Result<Subscription, CoreError>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    let tag = EventTag::new(rules, path.clone(), target)?;
    session.subscribe(tag, Arc::new(callback)).await
}
