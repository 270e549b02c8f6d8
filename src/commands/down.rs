//! Down command implementation

use console::Style;

use crate::cli::{Cli, DownArgs};
use crate::error::Result;
use crate::lifecycle;

/// De-provision the deployment
pub fn run(cli: &Cli, _args: &DownArgs) -> Result<()> {
    let sink = super::progress_sink(cli);
    let mut engine = super::engine_from_cli(cli, false)?;

    sink.begin(&format!("Destroying '{}'", engine.name()));
    let outcome = lifecycle::down(&mut engine);
    match &outcome {
        Ok(()) => sink.end(&format!(
            "{} Deployment '{}' is down",
            Style::new().green().apply_to("✓"),
            engine.name()
        )),
        Err(_) => sink.end(&format!(
            "{} De-provisioning '{}' failed",
            Style::new().red().apply_to("✗"),
            engine.name()
        )),
    }
    outcome
}
