// ── Event tags ──
//
// A tag is the canonical string for one logical subscription:
// `/<rules>/<kind>/<path>[/<extra>]`. Empty components are omitted, so a
// modified subscription on the namespace root is `/<rules>/modified`.

use std::fmt;

use dmlink_api::{EventDescriptor, EventKind, EventRequest};

use crate::error::CoreError;
use crate::path::DatamodelPath;

/// What a subscription listens for, relative to its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTarget {
    /// A member of `child_type` was created under the path.
    Created { child_type: String },
    Modified,
    Deleted,
    /// Something under the path changed. With a subtype, only changes
    /// below a direct child of that type count.
    Affected { subtype: Option<String> },
    AttributeChanged { attribute: String },
    CommandAttributeChanged { command: String, attribute: String },
    CommandExecuted { command: String },
}

impl EventTarget {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Created { .. } => EventKind::Created,
            Self::Modified => EventKind::Modified,
            Self::Deleted => EventKind::Deleted,
            Self::Affected { .. } => EventKind::Affected,
            Self::AttributeChanged { .. } => EventKind::AttributeChanged,
            Self::CommandAttributeChanged { .. } => EventKind::CommandAttributeChanged,
            Self::CommandExecuted { .. } => EventKind::CommandExecuted,
        }
    }

    fn extra(&self) -> Option<String> {
        match self {
            Self::Created { child_type } => Some(child_type.clone()),
            Self::Modified | Self::Deleted => None,
            Self::Affected { subtype } => subtype.clone(),
            Self::AttributeChanged { attribute } => Some(attribute.clone()),
            Self::CommandAttributeChanged { command, attribute } => {
                Some(format!("{command}/{attribute}"))
            }
            Self::CommandExecuted { command } => Some(command.clone()),
        }
    }

    fn names(&self) -> Vec<&str> {
        match self {
            Self::Created { child_type } => vec![child_type],
            Self::Modified | Self::Deleted => vec![],
            Self::Affected { subtype } => subtype.iter().map(String::as_str).collect(),
            Self::AttributeChanged { attribute } => vec![attribute],
            Self::CommandAttributeChanged { command, attribute } => vec![command, attribute],
            Self::CommandExecuted { command } => vec![command],
        }
    }
}

/// One logical subscription: namespace, path and target.
///
/// Two tags built from the same inputs always render to the same string,
/// which is what the registry keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventTag {
    rules: String,
    path: DatamodelPath,
    target: EventTarget,
}

impl EventTag {
    pub fn new(
        rules: impl Into<String>,
        path: DatamodelPath,
        target: EventTarget,
    ) -> Result<Self, CoreError> {
        let rules = rules.into();
        if rules.is_empty() || rules.contains('/') {
            return Err(CoreError::addressing(format!(
                "invalid rules namespace '{rules}'"
            )));
        }
        for name in target.names() {
            if name.is_empty() || name.contains('/') {
                return Err(CoreError::addressing(format!(
                    "invalid name '{name}' in {} tag",
                    target.kind()
                )));
            }
        }
        Ok(Self {
            rules,
            path,
            target,
        })
    }

    pub fn rules(&self) -> &str {
        &self.rules
    }

    pub fn path(&self) -> &DatamodelPath {
        &self.path
    }

    pub fn target(&self) -> &EventTarget {
        &self.target
    }

    pub fn kind(&self) -> EventKind {
        self.target.kind()
    }

    /// True when the subscription is rooted at or under `path` in `rules`.
    pub fn is_under(&self, rules: &str, path: &DatamodelPath) -> bool {
        self.rules == rules && self.path.starts_with(path)
    }

    /// The wire string.
    pub fn render(&self) -> String {
        let mut out = format!("/{}/{}", self.rules, self.target.kind());
        if !self.path.is_root() {
            out.push('/');
            out.push_str(&self.path.encode());
        }
        if let Some(extra) = self.target.extra() {
            out.push('/');
            out.push_str(&extra);
        }
        out
    }

    /// The request sent to `SubscribeEvents`.
    pub fn descriptor(&self) -> EventDescriptor {
        let path = self.path.encode();
        let request = match &self.target {
            EventTarget::Created { child_type } => EventRequest::Created {
                parent_path: path,
                child_type: child_type.clone(),
            },
            EventTarget::Modified => EventRequest::Modified { path },
            EventTarget::Deleted => EventRequest::Deleted { path },
            EventTarget::Affected { subtype } => EventRequest::Affected {
                path,
                subtype: subtype.clone(),
            },
            EventTarget::AttributeChanged { attribute } => EventRequest::AttributeChanged {
                path,
                attribute: attribute.clone(),
            },
            EventTarget::CommandAttributeChanged { command, attribute } => {
                EventRequest::CommandAttributeChanged {
                    path,
                    command: command.clone(),
                    attribute: attribute.clone(),
                }
            }
            EventTarget::CommandExecuted { command } => EventRequest::CommandExecuted {
                path,
                command: command.clone(),
            },
        };
        EventDescriptor {
            tag: self.render(),
            request,
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
