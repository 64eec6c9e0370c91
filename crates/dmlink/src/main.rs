mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dmlink_core::Session;
use dmlink_workflow::{WORKFLOW_RULES, Workflow, demo};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Workflow the built-in demo server starts with.
const DEMO_WORKFLOW: &str = "Watertight Geometry";

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a server
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "dmlink", &mut std::io::stdout());
            Ok(())
        }

        // All other commands require a session
        cmd => {
            let session = build_session(&cli.global).await?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &session, &cli.global).await;
            session.close().await;
            result
        }
    }
}

/// Open a session from the config file, profile, and CLI overrides.
///
/// `memory://` selects the built-in demo server, seeded with a workflow.
async fn build_session(global: &cli::GlobalOpts) -> Result<Session, CliError> {
    let cfg = config::load_config_or_default();
    let session_config = config::resolve_session_config(global, &cfg)?;

    if !config::is_memory(&session_config) {
        return Ok(Session::new(session_config)?);
    }

    let session = Session::with_rpc(Arc::new(demo::demo_datamodel()), session_config);
    Workflow::open(&session, WORKFLOW_RULES)
        .await?
        .initialize(DEMO_WORKFLOW)
        .await?;
    Ok(session)
}
