// JSON tree helpers for the in-memory datamodel.
//
// An object's state is a JSON object. A singleton child `T` lives under
// key `T`; the members of container `T` live under key `T` as a map from
// member name to member state.

use dmlink_api::{ParameterInfo, TypeInfo, ValueType};
use serde_json::{Map, Value};

use crate::path::PathSegment;

/// What a path names, according to the schema.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target<'s> {
    Object(&'s TypeInfo),
    Container(&'s TypeInfo),
    Parameter(&'s ParameterInfo),
}

pub(crate) fn resolve<'s>(root: &'s TypeInfo, segments: &[PathSegment]) -> Option<Target<'s>> {
    let mut info = root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let name = segment.type_name();
        if segment.instance().is_some() {
            info = info.named_objects.get(name)?.as_ref();
        } else if let Some(child) = info.singletons.get(name) {
            info = child.as_ref();
        } else if last {
            if let Some(member) = info.named_objects.get(name) {
                return Some(Target::Container(member.as_ref()));
            }
            return info.parameters.get(name).map(Target::Parameter);
        } else {
            return None;
        }
    }
    Some(Target::Object(info))
}

pub(crate) fn lookup<'v>(root: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    let mut current = root;
    for segment in segments {
        current = current.get(segment.type_name())?;
        if let Some(name) = segment.instance() {
            current = current.get(name)?;
        }
    }
    Some(current)
}

/// Mutable slot at `segments`, creating intermediate objects.
pub(crate) fn entry<'v>(root: &'v mut Value, segments: &[PathSegment]) -> &'v mut Value {
    let mut current = root;
    for segment in segments {
        current = child_mut(current, segment.type_name());
        if let Some(name) = segment.instance() {
            current = child_mut(current, name);
        }
    }
    current
}

fn child_mut<'v>(value: &'v mut Value, key: &str) -> &'v mut Value {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    &mut value[key]
}

/// Remove the named member at `segments` (last segment must be `Type:Name`).
pub(crate) fn remove_member(root: &mut Value, segments: &[PathSegment]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let name = last.instance()?;
    let mut current = root;
    for segment in parents {
        current = current.get_mut(segment.type_name())?;
        if let Some(instance) = segment.instance() {
            current = current.get_mut(instance)?;
        }
    }
    current
        .get_mut(last.type_name())?
        .as_object_mut()?
        .remove(name)
}

/// Objects merge key by key; anything else replaces.
pub(crate) fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(into), Value::Object(from)) => {
            for (key, value) in from {
                merge(into.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

pub(crate) fn default_for(value_type: ValueType) -> Value {
    match value_type {
        ValueType::String => Value::String(String::new()),
        ValueType::Integer => Value::from(0),
        ValueType::Real => Value::from(0.0),
        ValueType::Logical => Value::Bool(false),
        ValueType::StringList | ValueType::IntegerList | ValueType::RealList => {
            Value::Array(Vec::new())
        }
        ValueType::Dict => Value::Object(Map::new()),
    }
}

/// Fully resolved state: explicit, then default layer, then type default.
pub(crate) fn resolved(target: Target<'_>, explicit: Option<&Value>, defaults: Option<&Value>) -> Value {
    match target {
        Target::Object(info) => fill_object(info, explicit, defaults),
        Target::Container(info) => fill_container(info, explicit, defaults),
        Target::Parameter(info) => explicit
            .or(defaults)
            .cloned()
            .unwrap_or_else(|| default_for(info.value_type)),
    }
}

fn fill_object(info: &TypeInfo, explicit: Option<&Value>, defaults: Option<&Value>) -> Value {
    let mut out = Map::new();
    for (name, param) in &info.parameters {
        let value = resolved(
            Target::Parameter(param),
            explicit.and_then(|v| v.get(name)),
            defaults.and_then(|v| v.get(name)),
        );
        out.insert(name.clone(), value);
    }
    for (name, child) in &info.singletons {
        out.insert(
            name.clone(),
            fill_object(
                child,
                explicit.and_then(|v| v.get(name)),
                defaults.and_then(|v| v.get(name)),
            ),
        );
    }
    for (name, member) in &info.named_objects {
        out.insert(
            name.clone(),
            fill_container(
                member,
                explicit.and_then(|v| v.get(name)),
                defaults.and_then(|v| v.get(name)),
            ),
        );
    }
    Value::Object(out)
}

fn fill_container(info: &TypeInfo, explicit: Option<&Value>, defaults: Option<&Value>) -> Value {
    let mut names: Vec<&String> = Vec::new();
    for layer in [explicit, defaults].into_iter().flatten() {
        if let Value::Object(members) = layer {
            names.extend(members.keys());
        }
    }
    names.sort();
    names.dedup();

    let out: Map<String, Value> = names
        .into_iter()
        .map(|name| {
            let state = fill_object(
                info,
                explicit.and_then(|v| v.get(name)),
                defaults.and_then(|v| v.get(name)),
            );
            (name.clone(), state)
        })
        .collect();
    Value::Object(out)
}

/// Check `value` against what the schema allows at `target`.
pub(crate) fn validate(target: Target<'_>, value: &Value, at: &str) -> Result<(), String> {
    match target {
        Target::Parameter(info) => check_type(info.value_type, value, at),
        Target::Object(info) => {
            let Value::Object(map) = value else {
                return Err(format!("State of '{at}' must be an object"));
            };
            for (key, child) in map {
                let child_at = if at.is_empty() {
                    key.clone()
                } else {
                    format!("{at}/{key}")
                };
                if let Some(param) = info.parameters.get(key) {
                    check_type(param.value_type, child, &child_at)?;
                } else if let Some(single) = info.singletons.get(key) {
                    validate(Target::Object(single), child, &child_at)?;
                } else if let Some(member) = info.named_objects.get(key) {
                    validate(Target::Container(member), child, &child_at)?;
                } else {
                    return Err(format!("Unknown attribute '{key}'"));
                }
            }
            Ok(())
        }
        Target::Container(info) => {
            let Value::Object(members) = value else {
                return Err(format!("State of container '{at}' must be an object"));
            };
            for (name, member) in members {
                validate(Target::Object(info), member, &format!("{at}:{name}"))?;
            }
            Ok(())
        }
    }
}

fn check_type(value_type: ValueType, value: &Value, at: &str) -> Result<(), String> {
    let ok = match value_type {
        ValueType::String => value.is_string(),
        ValueType::Integer => value.is_i64() || value.is_u64(),
        ValueType::Real => value.is_number(),
        ValueType::Logical => value.is_boolean(),
        ValueType::StringList => value
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_string)),
        ValueType::IntegerList => value
            .as_array()
            .is_some_and(|items| items.iter().all(|v| v.is_i64() || v.is_u64())),
        ValueType::RealList => value
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_number)),
        ValueType::Dict => value.is_object(),
    };
    if ok {
        Ok(())
    } else {
        Err(format!("Invalid value for '{at}': expected {value_type}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::path::decode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> TypeInfo {
        TypeInfo::new()
            .singleton(
                "Setup",
                TypeInfo::new()
                    .parameter("Mode", ValueType::String)
                    .parameter("Steps", ValueType::Integer),
            )
            .named_object(
                "Zone",
                TypeInfo::new().parameter("Velocity", ValueType::Real),
            )
    }

    #[test]
    fn resolve_distinguishes_kinds() {
        let info = schema();
        assert!(matches!(resolve(&info, &decode("Setup").unwrap()), Some(Target::Object(_))));
        assert!(matches!(resolve(&info, &decode("Zone").unwrap()), Some(Target::Container(_))));
        assert!(matches!(resolve(&info, &decode("Zone:a").unwrap()), Some(Target::Object(_))));
        assert!(matches!(
            resolve(&info, &decode("Setup/Mode").unwrap()),
            Some(Target::Parameter(_))
        ));
        assert!(resolve(&info, &decode("Nope").unwrap()).is_none());
        assert!(resolve(&info, &decode("Setup/Mode/X").unwrap()).is_none());
    }

    #[test]
    fn resolved_state_fills_defaults() {
        let info = schema();
        let explicit = json!({ "Setup": { "Mode": "auto" }, "Zone": { "inlet": {} } });
        let defaults = json!({ "Setup": { "Steps": 5 } });
        let state = resolved(Target::Object(&info), Some(&explicit), Some(&defaults));
        assert_eq!(
            state,
            json!({
                "Setup": { "Mode": "auto", "Steps": 5 },
                "Zone": { "inlet": { "Velocity": 0.0 } }
            })
        );
    }

    #[test]
    fn entry_and_remove_member() {
        let mut root = json!({});
        *entry(&mut root, &decode("Zone:a/Velocity").unwrap()) = json!(1.5);
        assert_eq!(root, json!({ "Zone": { "a": { "Velocity": 1.5 } } }));
        let removed = remove_member(&mut root, &decode("Zone:a").unwrap());
        assert_eq!(removed, Some(json!({ "Velocity": 1.5 })));
        assert_eq!(root, json!({ "Zone": {} }));
    }

    #[test]
    fn validate_rejects_unknown_and_mistyped() {
        let info = schema();
        assert!(validate(Target::Object(&info), &json!({ "Setup": { "Mode": "x" } }), "").is_ok());
        assert_eq!(
            validate(Target::Object(&info), &json!({ "Colour": "red" }), "").unwrap_err(),
            "Unknown attribute 'Colour'"
        );
        assert_eq!(
            validate(Target::Object(&info), &json!({ "Setup": { "Steps": "many" } }), "")
                .unwrap_err(),
            "Invalid value for 'Setup/Steps': expected integer"
        );
    }

    #[test]
    fn merge_is_deep_for_objects() {
        let mut target = json!({ "A": { "x": 1, "y": 2 }, "L": [1] });
        merge(&mut target, json!({ "A": { "y": 3 }, "L": [2, 3] }));
        assert_eq!(target, json!({ "A": { "x": 1, "y": 3 }, "L": [2, 3] }));
    }
}
