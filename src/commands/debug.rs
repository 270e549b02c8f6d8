//! Debug command implementations
//!
//! Inspection surface over the resolver and the state store: version info,
//! resolved config summary, raw state dump, last provisioning result, an
//! interactive interpolation shell and the error-event slice of the log.

use std::io::{BufRead, Write};

use console::Style;
use serde_json::Value as Json;

use crate::cli::{Cli, DebugCommands};
use crate::error::Result;
use crate::interpolate::Phase;
use crate::state::EventStatus;

pub fn run(cli: &Cli, command: &DebugCommands) -> Result<()> {
    match command {
        DebugCommands::Version => version(),
        DebugCommands::Config => config(cli),
        DebugCommands::State => state(cli),
        DebugCommands::Result => result(cli),
        DebugCommands::Interpolate => interpolate(cli),
        DebugCommands::Errors => errors(cli),
    }
}

fn version() -> Result<()> {
    println!("cdf {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Build info:");
    println!("  Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
    println!(
        "  Profile: {}",
        if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        }
    );
    Ok(())
}

/// Resolved (not raw) config values, so templated identity fields show what
/// the deployment actually uses
fn config(cli: &Cli) -> Result<()> {
    let engine = super::engine_from_cli(cli, false)?;
    let bold = Style::new().bold();

    println!("{} {}", bold.apply_to("Name:"), engine.name());
    println!("{} {}", bold.apply_to("Scope:"), engine.scope());
    println!("{} {}", bold.apply_to("Location:"), engine.location());
    println!(
        "{} {}",
        bold.apply_to("Provisioner:"),
        engine.config().provisioner
    );
    if let Some(up) = engine.up_artifact() {
        println!("{} {}", bold.apply_to("Artifact:"), up);
    }
    println!("{} {}", bold.apply_to("Tmp dir:"), engine.tmp_dir().display());
    println!("{} {}", bold.apply_to("State:"), engine.state().uri());
    println!(
        "{} {}",
        bold.apply_to("Hooks:"),
        engine.config().hooks.names().join(", ")
    );
    println!(
        "{} {}",
        bold.apply_to("Tests:"),
        engine.config().tests.names().join(", ")
    );
    let deferred = engine.resolver().delayed_vars();
    if !deferred.is_empty() {
        println!(
            "{} {}",
            bold.apply_to("Deferred vars:"),
            deferred.join(", ")
        );
    }
    Ok(())
}

fn state(cli: &Cli) -> Result<()> {
    let engine = super::engine_from_cli(cli, false)?;
    let doc = engine.state().document();
    println!(
        "{}",
        serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(())
}

fn result(cli: &Cli) -> Result<()> {
    let engine = super::engine_from_cli(cli, false)?;
    let result = engine.state().result();
    if is_empty_value(result.get("outputs")) && is_empty_value(result.get("resources")) {
        println!("No provisioning result recorded.");
        return Ok(());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&result).unwrap_or_else(|_| "{}".to_string())
    );
    Ok(())
}

fn is_empty_value(value: Option<&Json>) -> bool {
    match value {
        None | Some(Json::Null) => true,
        Some(Json::Object(map)) => map.is_empty(),
        Some(Json::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Line-based shell over the late-phase resolver
fn interpolate(cli: &Cli) -> Result<()> {
    let mut engine = super::engine_from_cli(cli, false)?;
    // Pull in whatever deferred vars the current result can satisfy
    engine.delayed_variable_interpolate()?;

    println!("Interpolation shell. Enter a template, 'exit' or Ctrl-D to quit.");
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let template = line.trim();
        if template.is_empty() {
            continue;
        }
        if template == "exit" || template == "quit" {
            break;
        }
        match engine
            .resolver()
            .resolve_str(Phase::Late, template, "interpolation shell")
        {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => eprintln!("{}", Style::new().red().apply_to(e.to_string())),
        }
    }
    Ok(())
}

fn errors(cli: &Cli) -> Result<()> {
    let engine = super::engine_from_cli(cli, false)?;
    let errors: Vec<_> = engine
        .state()
        .events()
        .into_iter()
        .filter(|e| matches!(e.status, Some(EventStatus::Error | EventStatus::Failed)))
        .collect();
    if errors.is_empty() {
        println!("No error events recorded.");
        return Ok(());
    }
    println!("Error events (most recent first):");
    for event in errors {
        let hook = event
            .hook
            .map(|h| format!(" (hook {h})"))
            .unwrap_or_default();
        println!(
            "  {} {:>9} {}{}",
            event.timestamp,
            event.phase,
            Style::new().red().apply_to(&event.message),
            hook
        );
    }
    Ok(())
}
