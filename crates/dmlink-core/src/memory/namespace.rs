// State of one rules namespace, plus the context handed to command handlers.

use std::collections::HashMap;

use dmlink_api::TypeInfo;
use serde_json::{Map, Value};

use super::tree::{self, Target};
use crate::path::{DatamodelPath, PathSegment};

/// A state change, recorded so events can be derived afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Change {
    Set { path: DatamodelPath, created: bool },
    Deleted { path: DatamodelPath },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NamespaceState {
    pub(crate) schema: TypeInfo,
    pub(crate) explicit: Value,
    pub(crate) defaults: Value,
    /// `(path, attribute)` → value.
    pub(crate) attributes: HashMap<(String, String), Value>,
    /// `(path, command, attribute)` → value.
    pub(crate) command_attributes: HashMap<(String, String, String), Value>,
}

impl NamespaceState {
    pub(crate) fn new(schema: TypeInfo) -> Self {
        Self {
            schema,
            explicit: Value::Object(Map::new()),
            defaults: Value::Object(Map::new()),
            ..Self::default()
        }
    }

    pub(crate) fn target(&self, path: &DatamodelPath) -> Result<Target<'_>, String> {
        tree::resolve(&self.schema, path.segments())
            .ok_or_else(|| format!("Unknown path '{path}'"))
    }

    /// True when every named member along `path` exists.
    pub(crate) fn exists(&self, path: &DatamodelPath) -> bool {
        let segments = path.segments();
        (1..=segments.len())
            .filter(|&n| !segments[n - 1].is_singleton())
            .all(|n| self.member_exists(&segments[..n]))
    }

    fn member_exists(&self, segments: &[PathSegment]) -> bool {
        tree::lookup(&self.explicit, segments).is_some()
            || tree::lookup(&self.defaults, segments).is_some()
    }

    /// Require the named members along `path` to exist, except possibly
    /// the last segment when `allow_new_leaf` is set.
    fn check_exists(&self, path: &DatamodelPath, allow_new_leaf: bool) -> Result<(), String> {
        let check = if allow_new_leaf {
            path.parent().unwrap_or_default()
        } else {
            path.clone()
        };
        if self.exists(&check) {
            Ok(())
        } else {
            Err(format!("No object at '{path}'"))
        }
    }

    pub(crate) fn read(&self, path: &DatamodelPath, explicit_only: bool) -> Result<Value, String> {
        let target = self.target(path)?;
        self.check_exists(path, false)?;
        let explicit = tree::lookup(&self.explicit, path.segments());
        if explicit_only {
            return Ok(match target {
                Target::Object(_) | Target::Container(_) => explicit
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new())),
                Target::Parameter(_) => explicit.cloned().unwrap_or(Value::Null),
            });
        }
        let defaults = tree::lookup(&self.defaults, path.segments());
        Ok(tree::resolved(target, explicit, defaults))
    }

    /// Resolved state, or `None` when nothing lives at `path`.
    pub(crate) fn resolved(&self, path: &DatamodelPath) -> Option<Value> {
        self.read(path, false).ok()
    }

    /// Merge `value` into the explicit layer at `path`.
    pub(crate) fn write(&mut self, path: &DatamodelPath, value: Value) -> Result<Vec<Change>, String> {
        let target = self.target(path)?;
        self.check_exists(path, true)?;
        tree::validate(target, &value, &path.encode())?;

        let created = path.last().is_some_and(|s| !s.is_singleton()) && !self.exists(path);
        let mut changes = vec![Change::Set {
            path: path.clone(),
            created,
        }];
        self.new_members(target, path, &value, &mut changes);

        tree::merge(tree::entry(&mut self.explicit, path.segments()), value);
        Ok(changes)
    }

    fn new_members(&self, target: Target<'_>, at: &DatamodelPath, value: &Value, out: &mut Vec<Change>) {
        let Value::Object(map) = value else {
            return;
        };
        match target {
            Target::Parameter(_) => {}
            Target::Container(info) => {
                let Some(type_name) = at.last().map(PathSegment::type_name) else {
                    return;
                };
                let parent = at.parent().unwrap_or_default();
                for (name, member) in map {
                    let Ok(segment) = PathSegment::named(type_name, name.as_str()) else {
                        continue;
                    };
                    let member_path = parent.join(segment);
                    if !self.exists(&member_path) {
                        out.push(Change::Set {
                            path: member_path.clone(),
                            created: true,
                        });
                    }
                    self.new_members(Target::Object(info), &member_path, member, out);
                }
            }
            Target::Object(info) => {
                for (key, child) in map {
                    let Ok(segment) = PathSegment::singleton(key.as_str()) else {
                        continue;
                    };
                    if let Some(single) = info.singletons.get(key) {
                        self.new_members(Target::Object(single), &at.join(segment), child, out);
                    } else if let Some(member) = info.named_objects.get(key) {
                        self.new_members(Target::Container(member), &at.join(segment), child, out);
                    }
                }
            }
        }
    }

    /// Remove the named member at `path` from both layers.
    pub(crate) fn delete(&mut self, path: &DatamodelPath) -> Result<Vec<Change>, String> {
        if path.last().is_none_or(PathSegment::is_singleton) {
            return Err(format!("'{path}' is not a named object"));
        }
        self.target(path)?;
        self.check_exists(path, false)?;
        tree::remove_member(&mut self.explicit, path.segments());
        tree::remove_member(&mut self.defaults, path.segments());
        let wire = path.encode();
        let nested = format!("{wire}/");
        let gone = |p: &String| p == &wire || p.starts_with(&nested);
        self.attributes.retain(|(p, _), _| !gone(p));
        self.command_attributes.retain(|(p, _, _), _| !gone(p));
        Ok(vec![Change::Deleted { path: path.clone() }])
    }

    /// Merge `value` into the default layer at `path`. No events.
    pub(crate) fn write_defaults(&mut self, path: &DatamodelPath, value: Value) -> Result<(), String> {
        let target = self.target(path)?;
        tree::validate(target, &value, &path.encode())?;
        tree::merge(tree::entry(&mut self.defaults, path.segments()), value);
        Ok(())
    }
}

// ── CommandContext ───────────────────────────────────────────────

/// What a command handler sees: the object it runs on, its arguments and
/// read/write access to the namespace. Writes made here produce the same
/// events as `set_state`/`delete_object`.
pub struct CommandContext<'a> {
    pub(crate) state: &'a mut NamespaceState,
    pub(crate) path: &'a DatamodelPath,
    pub(crate) args: &'a Map<String, Value>,
    pub(crate) changes: Vec<Change>,
}

impl CommandContext<'_> {
    /// Path of the object the command runs on.
    pub fn path(&self) -> &DatamodelPath {
        self.path
    }

    pub fn args(&self) -> &Map<String, Value> {
        self.args
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }

    /// Resolved state at `path`.
    pub fn state(&self, path: &DatamodelPath) -> Option<Value> {
        self.state.resolved(path)
    }

    /// Resolved value of parameter `name` of the command's object.
    pub fn parameter(&self, name: &str) -> Option<Value> {
        let path = self.path.join(PathSegment::singleton(name).ok()?);
        self.state.resolved(&path)
    }

    /// Names of the members of container `type_name` under `parent`.
    pub fn member_names(&self, parent: &DatamodelPath, type_name: &str) -> Vec<String> {
        let Ok(segment) = PathSegment::singleton(type_name) else {
            return Vec::new();
        };
        match self.state.resolved(&parent.join(segment)) {
            Some(Value::Object(members)) => members.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn set(&mut self, path: &DatamodelPath, value: Value) -> Result<(), String> {
        let changes = self.state.write(path, value)?;
        self.changes.extend(changes);
        Ok(())
    }

    /// Set one parameter of the command's object.
    pub fn set_parameter(&mut self, name: &str, value: Value) -> Result<(), String> {
        let mut patch = Map::new();
        patch.insert(name.to_owned(), value);
        let path = self.path.clone();
        self.set(&path, Value::Object(patch))
    }

    pub fn delete(&mut self, path: &DatamodelPath) -> Result<(), String> {
        let changes = self.state.delete(path)?;
        self.changes.extend(changes);
        Ok(())
    }
}
