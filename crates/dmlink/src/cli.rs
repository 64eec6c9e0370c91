//! Clap derive structures for the `dmlink` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// dmlink -- drive a remote simulation datamodel from the command line
#[derive(Debug, Parser)]
#[command(
    name = "dmlink",
    version,
    about = "Read, write and watch a remote simulation datamodel",
    long_about = "Talks to a simulation server's datamodel: path-addressed state,\n\
        remote commands, event streams and guided meshing workflows.\n\n\
        Use --server memory:// to try everything against a built-in demo server.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "DMLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Server URL (overrides profile)
    #[arg(long, short = 's', env = "DMLINK_SERVER", global = true)]
    pub server: Option<String>,

    /// Rules namespace (overrides profile)
    #[arg(long, short = 'r', env = "DMLINK_RULES", global = true)]
    pub rules: Option<String>,

    /// Bearer token
    #[arg(long, env = "DMLINK_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DMLINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "DMLINK_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "DMLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read and write datamodel state
    #[command(alias = "st")]
    State(StateArgs),

    /// Run a command on a datamodel object
    Exec(ExecArgs),

    /// Show the static type information of a namespace
    Schema(SchemaArgs),

    /// Stream events for an object
    Watch(WatchArgs),

    /// Inspect and run guided workflows
    #[command(alias = "wf")]
    Workflow(WorkflowArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

#[derive(Debug, Subcommand)]
pub enum StateCommand {
    /// Print the state at a path
    Get {
        /// Datamodel path, e.g. `Setup/Models` or `Zone:inlet` (empty for root)
        #[arg(default_value = "")]
        path: String,

        /// Only attributes set explicitly on the server
        #[arg(long, short = 'e')]
        explicit: bool,
    },

    /// Merge a JSON value into the state at a path
    Set {
        /// Datamodel path
        path: String,

        /// JSON value, e.g. '{"Mode": "auto"}'
        value: String,
    },

    /// Read a server-side attribute (allowed values, help text, ...)
    Attr {
        /// Datamodel path
        path: String,

        /// Attribute name
        attribute: String,
    },

    /// Delete a named object, e.g. `Zone:inlet`
    Delete {
        /// Path of the named object
        path: String,
    },
}

// ── Exec ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Path of the object owning the command (empty for root)
    pub path: String,

    /// Command name
    pub command: String,

    /// Argument as KEY=VALUE; VALUE is parsed as JSON when it can be
    #[arg(long = "arg", short = 'a', value_name = "KEY=VALUE")]
    pub args: Vec<String>,

    /// All arguments as one JSON object
    #[arg(long, conflicts_with = "args")]
    pub json: Option<String>,
}

// ── Schema ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Show the type at this path instead of the root
    #[arg(default_value = "")]
    pub path: String,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Path of the object to watch (empty for root)
    #[arg(default_value = "")]
    pub path: String,

    /// Event kind
    #[arg(long, short = 'e', default_value = "modified")]
    pub event: WatchEvent,

    /// Child type for `created`, subtype for `affected`, attribute for
    /// `attribute-changed`, command for `command-executed`
    #[arg(long)]
    pub name: Option<String>,

    /// Stop after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum WatchEvent {
    Created,
    Modified,
    Deleted,
    Affected,
    AttributeChanged,
    CommandExecuted,
}

// ── Workflow ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowCommand,
}

#[derive(Debug, Subcommand)]
pub enum WorkflowCommand {
    /// List every task, in workflow order
    #[command(alias = "ls")]
    Tasks,

    /// Start a fresh workflow of the given type
    Init {
        /// Workflow type, e.g. "Watertight Geometry"
        workflow_type: String,
    },

    /// Execute one task, or without TASK the whole workflow in dependency order
    Execute {
        /// Task id (TaskObject3) or display name
        task: Option<String>,
    },

    /// Merge JSON arguments into a task (resets it to Out-of-date)
    SetArgs {
        /// Task id or display name
        task: String,

        /// JSON object
        value: String,
    },

    /// Siblings whose outputs the task requires
    Upstream {
        /// Task id or display name
        task: String,
    },

    /// Siblings that require the task's outputs
    Downstream {
        /// Task id or display name
        task: String,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Create or update a profile
    Init {
        /// Server URL for the profile
        #[arg(long)]
        url: String,

        /// Profile name
        #[arg(long = "name", default_value = "default")]
        name: String,

        /// Default rules namespace
        #[arg(long = "default-rules")]
        default_rules: Option<String>,

        /// Store this token in the system keyring
        #[arg(long = "save-token")]
        save_token: Option<String>,

        /// Make this the default profile
        #[arg(long)]
        make_default: bool,
    },

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
