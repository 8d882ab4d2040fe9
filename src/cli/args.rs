use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::types::BackendType;

#[derive(Parser, Debug)]
#[clap(name = "sandpit")]
#[clap(version, about = "Ephemeral remote sandboxes with a live dev server preview")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "SANDPIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,

    /// Base URL of a running sandpit server (overrides [server].url)
    #[clap(long, global = true, env = "SANDPIT_SERVER")]
    pub server: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the sandbox API over HTTP
    Serve(ServeArgs),

    /// Create a sandbox (replacing any existing one)
    Create,

    /// Run a command in the active sandbox, recreating it once if it stopped
    Run(RunArgs),

    /// Show the active sandbox and its health
    Status,

    /// Show dev server process, port and log status
    DevStatus,

    /// Terminate the active sandbox
    Terminate,

    /// List sandbox backends and whether they can be used here
    Backends,

    /// Initialize a new sandpit configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Sandbox Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (overrides [server].bind_addr)
    #[clap(long, short = 'b')]
    pub bind: Option<String>,

    /// Provisioning backend (overrides [sandbox].backend)
    #[clap(long, value_enum)]
    pub backend: Option<BackendType>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Command to execute
    #[clap(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
