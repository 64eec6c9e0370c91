// ── Delivered events ──

use chrono::{DateTime, Utc};
use dmlink_api::{EventKind, EventPayload};
use serde::Serialize;

use crate::path::DatamodelPath;

/// Key-level difference between two successive states of one object.
///
/// Keys are dotted paths into the state (`Settings.Mode`). A key whose
/// value went from anything to anything else is `changed`; a key that
/// disappeared is `deleted`; new keys count as changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateDiff {
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// One event as handed to callbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Wire tag of the subscription that matched.
    pub tag: String,
    pub rules: String,
    /// Path the subscription is rooted at.
    pub path: DatamodelPath,
    pub kind: EventKind,
    pub payload: EventPayload,
    /// Present for modified events once diff mode has a previous state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<StateDiff>,
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// New state carried by a modified event.
    pub fn state(&self) -> Option<&serde_json::Value> {
        match &self.payload {
            EventPayload::Modified { state } => Some(state),
            _ => None,
        }
    }
}
