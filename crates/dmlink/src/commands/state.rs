//! State subcommand handlers.

use tracing::debug;

use dmlink_core::{Child, ContainerOf, ObjectNode, PathSegment, Readable, Writable};

use crate::cli::{GlobalOpts, StateArgs, StateCommand};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(args: StateArgs, root: &ObjectNode, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        StateCommand::Get { path, explicit } => {
            let value = match util::resolve_path(root, &path)? {
                Child::Object(node) => node.get_state(explicit).await?,
                Child::Container(node) => node.get_state(explicit).await?,
                Child::Parameter(node) => node.get_state(explicit).await?,
                Child::Command(_) => return Err(not_stateful(&path)),
            };
            output::print_output(&output::render_value(&global.output, &value), global.quiet);
            Ok(())
        }

        StateCommand::Set { path, value } => {
            let value = util::parse_json_lenient(&value);
            debug!(%path, "setting state");
            match util::resolve_path(root, &path)? {
                Child::Object(node) => node.set_state(value).await?,
                Child::Parameter(node) => node.set_state(value).await?,
                Child::Container(_) | Child::Command(_) => return Err(not_stateful(&path)),
            }
            if !global.quiet {
                eprintln!("Updated {path}");
            }
            Ok(())
        }

        StateCommand::Attr { path, attribute } => {
            let value = match util::resolve_path(root, &path)? {
                Child::Object(node) => node.attribute_value(&attribute).await?,
                Child::Container(node) => node.attribute_value(&attribute).await?,
                Child::Parameter(node) => node.attribute_value(&attribute).await?,
                Child::Command(_) => return Err(not_stateful(&path)),
            };
            output::print_output(&output::render_value(&global.output, &value), global.quiet);
            Ok(())
        }

        StateCommand::Delete { path } => {
            let object = util::resolve_object(root, &path)?;
            let Some(name) = object.path().last().and_then(PathSegment::instance) else {
                return Err(CliError::Addressing {
                    message: format!("'{path}' is not a named object"),
                });
            };
            let parent = match object.path().parent() {
                Some(parent) if !parent.is_root() => util::resolve_object(root, &parent.encode())?,
                _ => root.clone(),
            };
            parent
                .container(object.type_name())?
                .delete_object(name)
                .await?;
            if !global.quiet {
                eprintln!("Deleted {path}");
            }
            Ok(())
        }
    }
}

fn not_stateful(path: &str) -> CliError {
    CliError::Addressing {
        message: format!("'{path}' has no state of its own"),
    }
}
