//! Command implementations for the cdf CLI

pub mod completions;
pub mod debug;
pub mod down;
pub mod hook;
pub mod status;
pub mod up;

use std::path::PathBuf;

use crate::cli::Cli;
use crate::config;
use crate::engine::{Engine, EngineOptions};
use crate::error::Result;
use crate::progress::{ProgressSink, SilentSink, SpinnerSink};

/// Config file location from the global flags
fn config_path(cli: &Cli) -> PathBuf {
    config::config_path(cli.working_dir.as_deref(), &cli.config)
}

/// Bootstrap an engine from the global flags
fn engine_from_cli(cli: &Cli, remove_tmp: bool) -> Result<Engine> {
    let options = EngineOptions {
        state_uri: cli.state_file.clone(),
        remove_tmp,
    };
    Engine::bootstrap(&config_path(cli), &options)
}

/// Spinner for interactive runs; verbose output gets plain lines instead so
/// child process output is not mangled by the tick
fn progress_sink(cli: &Cli) -> Box<dyn ProgressSink> {
    if cli.verbose {
        Box::new(SilentSink)
    } else {
        Box::new(SpinnerSink::new())
    }
}
