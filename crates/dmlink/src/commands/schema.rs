//! Schema subcommand handler.

use serde::Serialize;
use tabled::Tabled;

use dmlink_core::{Child, ObjectNode, TypeInfo};

use crate::cli::{GlobalOpts, OutputFormat, SchemaArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct SchemaEntry {
    name: String,
    kind: &'static str,
    detail: String,
}

#[derive(Tabled)]
struct SchemaRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn entries(info: &TypeInfo) -> Vec<SchemaEntry> {
    let singletons = info.singletons.keys().map(|name| SchemaEntry {
        name: name.clone(),
        kind: "object",
        detail: String::new(),
    });
    let containers = info.named_objects.keys().map(|name| SchemaEntry {
        name: name.clone(),
        kind: "container",
        detail: format!("{name}:<name>"),
    });
    let parameters = info.parameters.iter().map(|(name, p)| SchemaEntry {
        name: name.clone(),
        kind: "parameter",
        detail: p.value_type.to_string(),
    });
    let commands = info.commands.iter().map(|(name, c)| SchemaEntry {
        name: name.clone(),
        kind: "command",
        detail: c.arguments.keys().cloned().collect::<Vec<_>>().join(", "),
    });
    singletons
        .chain(containers)
        .chain(parameters)
        .chain(commands)
        .collect()
}

pub async fn handle(args: SchemaArgs, root: &ObjectNode, global: &GlobalOpts) -> Result<(), CliError> {
    let info = match util::resolve_path(root, &args.path)? {
        Child::Object(node) => node.type_info().clone(),
        Child::Container(node) => node.member_info().clone(),
        Child::Parameter(_) | Child::Command(_) => {
            return Err(CliError::Addressing {
                message: format!("'{}' is not an object or container", args.path),
            });
        }
    };

    let out = match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact | OutputFormat::Yaml => {
            output::render_single(&global.output, info.as_ref(), |_| String::new(), |_| String::new())
        }
        _ => output::render_list(
            &global.output,
            &entries(&info),
            |e| SchemaRow {
                name: e.name.clone(),
                kind: e.kind,
                detail: e.detail.clone(),
            },
            |e| e.name.clone(),
        ),
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmlink_core::ValueType;

    #[test]
    fn entries_follow_declaration_groups() {
        let info = TypeInfo::new()
            .parameter("TaskList", ValueType::StringList)
            .singleton("Workflow", TypeInfo::new())
            .named_object("TaskObject", TypeInfo::new());
        let names: Vec<_> = entries(&info).into_iter().map(|e| (e.name, e.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("Workflow".to_owned(), "object"),
                ("TaskObject".to_owned(), "container"),
                ("TaskList".to_owned(), "parameter"),
            ]
        );
    }
}
