//! cdf - declarative deployment lifecycle orchestrator
//!
//! Reads a declarative deployment config, resolves its templated values in
//! two phases, and drives the deployment through provisioning, hooks,
//! durable state tracking and test matrices.

use clap::Parser;

mod cli;
mod commands;
mod common;
mod config;
mod engine;
mod error;
mod hooks;
mod interpolate;
mod lifecycle;
mod platform;
mod progress;
mod provision;
mod state;
mod tester;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Up(args) => commands::up::run(&cli, args),
        Commands::Down(args) => commands::down::run(&cli, args),
        Commands::Status(args) => commands::status::run(&cli, args),
        Commands::Hook(args) => commands::hook::run(&cli, args),
        Commands::Test(args) => commands::test::run(&cli, args),
        Commands::Debug(command) => commands::debug::run(&cli, command),
        Commands::Completions(args) => commands::completions::run(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
