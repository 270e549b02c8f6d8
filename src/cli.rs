//! CLI definitions using clap derive API

use clap::builder::{Styles, styling::AnsiColor};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{CONFIG_DEFAULT, DownStrategy, UpgradeStrategy};

/// cdf - declarative deployment lifecycle orchestrator
///
/// Drive IaC deployments through an up/down lifecycle with interpolated
/// configuration, durable state, hooks and a test matrix.
#[derive(Parser, Debug)]
#[command(
    name = "cdf",
    author,
    version,
    color = clap::ColorChoice::Always,
    styles = Styles::styled()
        .header(AnsiColor::Green.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default().bold())
        .placeholder(AnsiColor::Cyan.on_default()),
    about = "Declarative deployment lifecycle orchestrator",
    long_about = "cdf reads a declarative deployment config (.cdf.yml), resolves its \
                  templated values in two phases, and drives the deployment through \
                  provisioning, hooks, durable state tracking and test matrices.",
    after_help = "\x1b[1m\x1b[32mExamples:\x1b[0m\n    \
                  cdf up\n    \
                  cdf status --events\n    \
                  cdf hook smoke 10.0.0.4\n    \
                  cdf test --upgrade-strategy fresh\n    \
                  cdf debug state"
)]
pub struct Cli {
    /// Config file name or path
    #[arg(long, short = 'c', global = true, default_value = CONFIG_DEFAULT)]
    pub config: String,

    /// Directory the config path is resolved against (defaults to current directory)
    #[arg(long, short = 'w', global = true)]
    pub working_dir: Option<PathBuf>,

    /// Override the state document location (file:// or http(s):// URI)
    #[arg(long, global = true)]
    pub state_file: Option<String>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the deployment
    Up(UpArgs),

    /// De-provision the deployment
    Down(DownArgs),

    /// Show deployment phase and status
    Status(StatusArgs),

    /// Run a hook, or list the configured hooks
    Hook(HookArgs),

    /// Run the test/upgrade matrix
    Test(TestArgs),

    /// Inspect resolved configuration and state
    #[command(subcommand)]
    Debug(DebugCommands),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the up command
#[derive(Parser, Debug)]
pub struct UpArgs {
    /// Recreate the scratch directory before provisioning
    #[arg(long)]
    pub remove_tmp: bool,
}

/// Arguments for the down command
#[derive(Parser, Debug)]
pub struct DownArgs {}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Show the full event log, newest first
    #[arg(long)]
    pub events: bool,
}

/// Arguments for the hook command
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:\n  \
                  List configured hooks:\n    cdf hook\n\n\
                  Run a hook:\n    cdf hook smoke\n\n\
                  Run a hook with call-time arguments:\n    cdf hook smoke 10.0.0.4 https")]
pub struct HookArgs {
    /// Hook name followed by its call-time arguments; omit to list hooks
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    /// Accepted for compatibility; hooks never prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Arguments for the test command
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:\n  \
                  Run every declared test:\n    cdf test\n\n\
                  Run selected tests:\n    cdf test smoke failover\n\n\
                  Fresh provisioning only:\n    cdf test --upgrade-strategy fresh\n\n\
                  Keep failed deployments for inspection:\n    cdf test --down-strategy success")]
pub struct TestArgs {
    /// Test names to run; omit to run every declared test
    pub tests: Vec<String>,

    /// Abort the whole matrix on the first mismatch
    #[arg(long)]
    pub exit_on_error: bool,

    /// When scenarios are de-provisioned
    #[arg(long, value_enum, default_value_t = DownStrategy::Always)]
    pub down_strategy: DownStrategy,

    /// Which upgrade columns of the matrix run
    #[arg(long, value_enum, default_value_t = UpgradeStrategy::All)]
    pub upgrade_strategy: UpgradeStrategy,
}

/// Debug subcommands
#[derive(Subcommand, Debug)]
pub enum DebugCommands {
    /// Show version and build information
    Version,
    /// Show the resolved deployment configuration
    Config,
    /// Dump the state document as JSON
    State,
    /// Show the last provisioning result
    Result,
    /// Interactive interpolation shell over the resolver
    Interpolate,
    /// Show error events from the state log
    Errors,
}

/// Arguments for completions command
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:\n  \
                  Generate bash completions:\n    cdf completions --shell bash > ~/.bash_completion.d/cdf\n\n\
                  Generate zsh completions:\n    cdf completions --shell zsh > ~/.zfunc/_cdf\n\n\
                  Generate fish completions:\n    cdf completions --shell fish > ~/.config/fish/completions/cdf.fish")]
pub struct CompletionsArgs {
    /// Shell type (bash, elvish, fish, powershell, zsh)
    #[arg(long)]
    pub shell: String,
}
