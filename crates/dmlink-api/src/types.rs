//! Wire types shared by every transport.
//!
//! Paths travel as their encoded string form (`Type:Name/Child`); the
//! typed path codec lives in `dmlink-core`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};

// ── Event kinds ──────────────────────────────────────────────────────

/// The kinds of datamodel event a client can subscribe to.
///
/// The snake_case form is the one used inside event tags.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Affected,
    AttributeChanged,
    CommandAttributeChanged,
    CommandExecuted,
}

// ── Subscription requests ────────────────────────────────────────────

/// What a subscription listens for. One variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventRequest {
    Created {
        parent_path: String,
        child_type: String,
    },
    Modified {
        path: String,
    },
    Deleted {
        path: String,
    },
    Affected {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtype: Option<String>,
    },
    AttributeChanged {
        path: String,
        attribute: String,
    },
    CommandAttributeChanged {
        path: String,
        command: String,
        attribute: String,
    },
    CommandExecuted {
        path: String,
        command: String,
    },
}

impl EventRequest {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Created { .. } => EventKind::Created,
            Self::Modified { .. } => EventKind::Modified,
            Self::Deleted { .. } => EventKind::Deleted,
            Self::Affected { .. } => EventKind::Affected,
            Self::AttributeChanged { .. } => EventKind::AttributeChanged,
            Self::CommandAttributeChanged { .. } => EventKind::CommandAttributeChanged,
            Self::CommandExecuted { .. } => EventKind::CommandExecuted,
        }
    }

    /// The path the subscription is rooted at (the parent path for
    /// creation events).
    pub fn path(&self) -> &str {
        match self {
            Self::Created { parent_path, .. } => parent_path,
            Self::Modified { path }
            | Self::Deleted { path }
            | Self::Affected { path, .. }
            | Self::AttributeChanged { path, .. }
            | Self::CommandAttributeChanged { path, .. }
            | Self::CommandExecuted { path, .. } => path,
        }
    }
}

/// A subscription request as sent to `SubscribeEvents`: the client-chosen
/// tag plus what it listens for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub tag: String,
    #[serde(flatten)]
    pub request: EventRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Ok,
    Failed,
}

/// Per-tag answer to a subscribe or unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResult {
    pub tag: String,
    pub status: SubscriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubscriptionResult {
    pub fn ok(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            status: SubscriptionStatus::Ok,
            message: None,
        }
    }

    pub fn failed(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            status: SubscriptionStatus::Failed,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SubscriptionStatus::Ok
    }
}

// ── Stream messages ──────────────────────────────────────────────────

/// One message read from the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub tag: String,
    pub payload: EventPayload,
}

/// Event payload. Which variant arrives is determined by the kind of the
/// subscription the tag was created for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Created {
        child_path: String,
    },
    Modified {
        state: Value,
    },
    Deleted {
        #[serde(default)]
        paths: Vec<String>,
    },
    Affected,
    AttributeChanged {
        value: Value,
    },
    CommandAttributeChanged {
        value: Value,
    },
    CommandExecuted {
        command: String,
        #[serde(default)]
        arguments: Value,
    },
}

// ── Static info ──────────────────────────────────────────────────────

/// Value type of a parameter or command argument.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValueType {
    #[default]
    String,
    Integer,
    Real,
    Logical,
    StringList,
    IntegerList,
    RealList,
    Dict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, ParameterInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl CommandInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn argument(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.arguments.insert(
            name.into(),
            ParameterInfo {
                value_type,
                help: None,
            },
        );
        self
    }
}

/// Static description of one object type in a rules namespace.
///
/// Returned by `GetStaticInfo` for the namespace root; nested types hang
/// off `singletons` and `named_objects`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub singletons: BTreeMap<String, Arc<TypeInfo>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named_objects: BTreeMap<String, Arc<TypeInfo>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub commands: BTreeMap<String, CommandInfo>,
}

impl TypeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(mut self, name: impl Into<String>, info: TypeInfo) -> Self {
        self.singletons.insert(name.into(), Arc::new(info));
        self
    }

    pub fn named_object(mut self, name: impl Into<String>, info: TypeInfo) -> Self {
        self.named_objects.insert(name.into(), Arc::new(info));
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.parameters.insert(
            name.into(),
            ParameterInfo {
                value_type,
                help: None,
            },
        );
        self
    }

    pub fn command(mut self, name: impl Into<String>, info: CommandInfo) -> Self {
        self.commands.insert(name.into(), info);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn event_kind_uses_snake_case() {
        assert_eq!(EventKind::AttributeChanged.to_string(), "attribute_changed");
        assert_eq!(
            "command_executed".parse::<EventKind>().unwrap(),
            EventKind::CommandExecuted
        );
    }

    #[test]
    fn descriptor_flattens_request() {
        let descriptor = EventDescriptor {
            tag: "/test/created/A:A1/B".into(),
            request: EventRequest::Created {
                parent_path: "A:A1".into(),
                child_type: "B".into(),
            },
        };
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(
            value,
            json!({
                "tag": "/test/created/A:A1/B",
                "kind": "created",
                "parent_path": "A:A1",
                "child_type": "B"
            })
        );
        let back: EventDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn affected_subtype_is_optional() {
        let request: EventRequest =
            serde_json::from_value(json!({ "kind": "affected", "path": "A:A1" })).unwrap();
        assert_eq!(
            request,
            EventRequest::Affected {
                path: "A:A1".into(),
                subtype: None
            }
        );
        assert_eq!(request.kind(), EventKind::Affected);
        assert_eq!(request.path(), "A:A1");
    }

    #[test]
    fn stream_message_payloads() {
        let msg: StreamMessage = serde_json::from_value(json!({
            "tag": "/test/modified/A:A1",
            "payload": { "type": "modified", "state": { "X": 1 } }
        }))
        .unwrap();
        assert_eq!(
            msg.payload,
            EventPayload::Modified {
                state: json!({ "X": 1 })
            }
        );

        let msg: StreamMessage = serde_json::from_value(json!({
            "tag": "/test/affected/A:A1",
            "payload": { "type": "affected" }
        }))
        .unwrap();
        assert_eq!(msg.payload, EventPayload::Affected);
    }

    #[test]
    fn static_info_parses_nested_types() {
        let info: TypeInfo = serde_json::from_value(json!({
            "singletons": {
                "Setup": {
                    "parameters": { "Mode": { "type": "string" } },
                    "commands": { "Run": { "arguments": { "Steps": { "type": "integer" } } } }
                }
            },
            "named_objects": { "Zone": {} }
        }))
        .unwrap();

        let setup = &info.singletons["Setup"];
        assert_eq!(setup.parameters["Mode"].value_type, ValueType::String);
        assert_eq!(
            setup.commands["Run"].arguments["Steps"].value_type,
            ValueType::Integer
        );
        assert!(info.named_objects.contains_key("Zone"));
    }
}
