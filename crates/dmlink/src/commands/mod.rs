pub mod config_cmd;
pub mod exec;
pub mod schema;
pub mod state;
pub mod util;
pub mod watch;
pub mod workflow;

use dmlink_core::Session;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a session-bound command to its handler.
pub async fn dispatch(cmd: Command, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Workflow(args) => workflow::handle(args, session, global).await,
        Command::State(args) => state::handle(args, &session.default_root().await?, global).await,
        Command::Exec(args) => exec::handle(args, &session.default_root().await?, global).await,
        Command::Schema(args) => schema::handle(args, &session.default_root().await?, global).await,
        Command::Watch(args) => watch::handle(args, &session.default_root().await?, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions run without a session".into(),
        )),
    }
}
