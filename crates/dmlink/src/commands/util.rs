//! Shared helpers for command handlers.

use serde_json::{Map, Value};

use dmlink_core::{Child, ContainerOf, DatamodelPath, ObjectNode};
use dmlink_workflow::{Task, Workflow};

use crate::error::CliError;

/// Walk `raw` from `root`, one segment at a time, against the schema.
///
/// `Type:Name` segments go through the `Type` container; plain segments
/// resolve to whatever child the schema declares under that name. Only
/// the last segment may be a parameter, container or command.
pub fn resolve_path(root: &ObjectNode, raw: &str) -> Result<Child, CliError> {
    let path: DatamodelPath = raw.trim_matches('/').parse()?;
    let mut current = Child::Object(root.clone());

    for segment in path.segments() {
        let object = match current {
            Child::Object(object) => object,
            other => {
                return Err(CliError::Addressing {
                    message: format!("'{raw}' goes through a {} node", other.kind()),
                });
            }
        };
        current = match segment.instance() {
            Some(name) => Child::Object(object.container(segment.type_name())?.object(name)?),
            None => object.child(segment.type_name())?,
        };
    }
    Ok(current)
}

/// Resolve a path that must name an object.
pub fn resolve_object(root: &ObjectNode, raw: &str) -> Result<ObjectNode, CliError> {
    match resolve_path(root, raw)? {
        Child::Object(object) => Ok(object),
        other => Err(CliError::Addressing {
            message: format!("'{raw}' is a {}, not an object", other.kind()),
        }),
    }
}

/// Parse a JSON argument. Bare words that are not JSON become strings.
pub fn parse_json_lenient(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Parse a JSON object argument.
pub fn parse_json_object(field: &str, raw: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(CliError::Validation {
            field: field.into(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}

/// Collect `KEY=VALUE` pairs into a command argument map.
pub fn parse_key_values(pairs: &[String]) -> Result<Map<String, Value>, CliError> {
    let mut args = Map::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| CliError::Validation {
            field: "arg".into(),
            reason: format!("expected KEY=VALUE, got '{pair}'"),
        })?;
        args.insert(key.trim().to_owned(), parse_json_lenient(value));
    }
    Ok(args)
}

/// Resolve a task identifier: an id such as `TaskObject3`, else a
/// display name.
pub async fn resolve_task(workflow: &Workflow, identifier: &str) -> Result<Task, CliError> {
    let ids = workflow
        .all_tasks()
        .await?
        .into_iter()
        .map(|task| task.id().to_owned())
        .collect::<Vec<_>>();
    if ids.iter().any(|id| id == identifier) {
        return Ok(workflow.task(identifier).await?);
    }
    Ok(workflow.find_task(identifier).await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_values_parse_json_or_fall_back_to_strings() {
        let args = parse_key_values(&[
            "WorkflowType=Watertight Geometry".into(),
            "Count=3".into(),
            "Names=[\"a\"]".into(),
        ])
        .unwrap();
        assert_eq!(args["WorkflowType"], json!("Watertight Geometry"));
        assert_eq!(args["Count"], json!(3));
        assert_eq!(args["Names"], json!(["a"]));
    }

    #[test]
    fn key_without_value_is_rejected() {
        let err = parse_key_values(&["Count".into()]).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
    }

    #[test]
    fn object_argument_must_be_an_object() {
        assert!(parse_json_object("value", r#"{"A": 1}"#).is_ok());
        assert!(matches!(
            parse_json_object("value", "[1]").unwrap_err(),
            CliError::Validation { .. }
        ));
    }
}
