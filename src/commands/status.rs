//! Status command implementation
//!
//! Shows the durable view of the deployment: identity, phase and the
//! status-pointer event, optionally followed by the full event log.

use console::Style;

use crate::cli::{Cli, StatusArgs};
use crate::error::Result;

pub fn run(cli: &Cli, args: &StatusArgs) -> Result<()> {
    let engine = super::engine_from_cli(cli, false)?;
    let doc = engine.state().document();
    let bold = Style::new().bold();

    println!(
        "{} {}",
        bold.apply_to("Deployment:"),
        doc.deployment_name.as_deref().unwrap_or("(unset)")
    );
    println!(
        "{} {}",
        bold.apply_to("Scope:"),
        doc.resource_scope.as_deref().unwrap_or("(unset)")
    );
    println!("{} {}", bold.apply_to("Phase:"), doc.phase);
    match doc.status_event() {
        Some(event) => {
            let status = event
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!("{} {}", bold.apply_to("Status:"), styled_status(&status));
            println!("{} {}", bold.apply_to("Message:"), event.message);
        }
        None => println!("{} unknown", bold.apply_to("Status:")),
    }
    println!("{} {}", bold.apply_to("Updated:"), doc.last_update);
    println!("{} {}", bold.apply_to("State:"), engine.state().uri());

    if args.events {
        println!();
        println!("{}", bold.apply_to("Events (most recent first):"));
        for event in engine.state().events() {
            let status = event
                .status
                .map(|s| format!(" [{}]", styled_status(&s.to_string())))
                .unwrap_or_default();
            let hook = event
                .hook
                .map(|h| format!(" (hook {h})"))
                .unwrap_or_default();
            println!(
                "  {} {:>9} {}{}{}",
                event.timestamp, event.phase, event.message, status, hook
            );
        }
    }

    Ok(())
}

fn styled_status(status: &str) -> String {
    let style = match status {
        "success" => Style::new().green(),
        "error" | "failed" => Style::new().red(),
        "pending" => Style::new().yellow(),
        _ => Style::new(),
    };
    style.apply_to(status).to_string()
}
