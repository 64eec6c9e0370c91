// ── Per-root state cache ──
//
// Backs diff mode in the dispatcher. The first modified event for a root
// only seeds the cache; later ones are compared against it.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde_json::Value;

use crate::event::StateDiff;
use crate::path::DatamodelPath;

#[derive(Debug, Default)]
pub(crate) struct StateCache {
    states: DashMap<(String, DatamodelPath), Value>,
}

impl StateCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `state` for `(rules, path)` and return the diff against what
    /// was cached before, if anything was.
    pub(crate) fn apply(&self, rules: &str, path: &DatamodelPath, state: &Value) -> Option<StateDiff> {
        let previous = self
            .states
            .insert((rules.to_owned(), path.clone()), state.clone())?;
        Some(diff(&previous, state))
    }

    /// Drop cached states for `path` and everything under it.
    pub(crate) fn forget_under(&self, rules: &str, path: &DatamodelPath) {
        self.states
            .retain(|(r, p), _| !(r == rules && p.starts_with(path)));
    }

    pub(crate) fn clear(&self) {
        self.states.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }
}

/// Key diff of two states, flattened to dotted leaf keys.
pub(crate) fn diff(old: &Value, new: &Value) -> StateDiff {
    let mut before = BTreeMap::new();
    let mut after = BTreeMap::new();
    flatten(old, String::new(), &mut before);
    flatten(new, String::new(), &mut after);

    let mut result = StateDiff::default();
    for (key, value) in &after {
        if before.get(key) != Some(value) {
            result.changed.push(key.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            result.deleted.push(key.clone());
        }
    }
    result
}

fn flatten<'a>(value: &'a Value, prefix: String, out: &mut BTreeMap<String, &'a Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(child, key, out);
            }
        }
        _ => {
            out.insert(prefix, value);
        }
    }
}
