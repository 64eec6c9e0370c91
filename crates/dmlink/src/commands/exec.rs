//! Exec subcommand handler.

use tracing::debug;

use dmlink_core::ObjectNode;

use crate::cli::{ExecArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(args: ExecArgs, root: &ObjectNode, global: &GlobalOpts) -> Result<(), CliError> {
    let object = util::resolve_object(root, &args.path)?;
    let arguments = match args.json {
        Some(ref raw) => util::parse_json_object("json", raw)?,
        None => util::parse_key_values(&args.args)?,
    };

    debug!(path = %args.path, command = %args.command, "executing command");
    let result = object.execute(&args.command, arguments).await?;
    output::print_output(&output::render_value(&global.output, &result), global.quiet);
    Ok(())
}
