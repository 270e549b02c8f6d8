//! Progress reporting for long-running lifecycle and test phases
//!
//! The core only talks to the [`ProgressSink`] trait; the CLI picks a
//! spinner-backed sink, tests and machine consumers get the silent one.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporting seam between the core and the terminal
pub trait ProgressSink {
    /// Start a named phase
    fn begin(&self, msg: &str);
    /// Finish the running phase
    fn end(&self, msg: &str);
}

/// Spinner-backed progress display
pub struct SpinnerSink {
    bar: ProgressBar,
}

impl SpinnerSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl Default for SpinnerSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for SpinnerSink {
    fn begin(&self, msg: &str) {
        self.bar.enable_steady_tick(Duration::from_millis(120));
        self.bar.set_message(msg.to_string());
    }

    fn end(&self, msg: &str) {
        self.bar.disable_steady_tick();
        self.bar.println(msg.to_string());
        self.bar.set_message(String::new());
    }
}

/// No-op sink for tests and quiet output modes
pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn begin(&self, _msg: &str) {}
    fn end(&self, _msg: &str) {}
}
