//! Up command implementation

use console::Style;

use crate::cli::{Cli, UpArgs};
use crate::error::Result;
use crate::lifecycle;

/// Provision the deployment
pub fn run(cli: &Cli, args: &UpArgs) -> Result<()> {
    let sink = super::progress_sink(cli);
    let mut engine = super::engine_from_cli(cli, args.remove_tmp)?;

    sink.begin(&format!("Deploying '{}'", engine.name()));
    let outcome = lifecycle::up(&mut engine);
    match &outcome {
        Ok(()) => sink.end(&format!(
            "{} Deployment '{}' is up",
            Style::new().green().apply_to("✓"),
            engine.name()
        )),
        Err(_) => sink.end(&format!(
            "{} Deployment '{}' failed",
            Style::new().red().apply_to("✗"),
            engine.name()
        )),
    }
    outcome
}
