//! Hook command implementation
//!
//! With a name, runs that hook with the remaining call-time arguments. With
//! no name, lists the configured hooks with their triggers and conditions.

use console::Style;

use crate::cli::{Cli, HookArgs};
use crate::error::Result;
use crate::hooks;

pub fn run(cli: &Cli, args: &HookArgs) -> Result<()> {
    let _ = args.yes; // no prompt to bypass
    let mut engine = super::engine_from_cli(cli, false)?;

    if args.args.is_empty() {
        return list_hooks(&engine);
    }
    hooks::run_hook(&mut engine, &args.args)
}

fn list_hooks(engine: &crate::engine::Engine) -> Result<()> {
    let hooks = &engine.config().hooks;
    if hooks.is_empty() {
        println!("No hooks configured.");
        return Ok(());
    }

    println!("Configured hooks ({}):", hooks.len());
    println!();
    for (name, hook) in hooks.iter() {
        println!("  {}", Style::new().bold().yellow().apply_to(name));
        if !hook.description.is_empty() {
            println!(
                "    {} {}",
                Style::new().bold().apply_to("Description:"),
                hook.description
            );
        }
        let triggers: Vec<&str> = hook
            .lifecycle
            .triggers()
            .iter()
            .map(|t| t.as_str())
            .collect();
        let lifecycle = if triggers.is_empty() {
            "any".to_string()
        } else {
            triggers.join(", ")
        };
        println!(
            "    {} {}",
            Style::new().bold().apply_to("Lifecycle:"),
            lifecycle
        );
        if hook.run_if != "true" {
            println!(
                "    {} {}",
                Style::new().bold().apply_to("Condition:"),
                hook.run_if
            );
        }
        println!("    {} {}", Style::new().bold().apply_to("Ops:"), hook.ops.len());
        println!();
    }
    Ok(())
}
