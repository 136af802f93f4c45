//! Terminal display for stage execution
//!
//! Renders stage progress as human-readable colored output. All output goes
//! to stderr so stdout remains clean for the stage report.

use std::time::Duration;

use colored::Colorize;

use crate::deploy::state::DeployTrace;

/// Display handler for one stage invocation
pub struct StageDisplay {
    stage_name: String,
}

impl StageDisplay {
    /// Create a new display handler for the given stage
    #[must_use]
    pub fn new(stage_name: &str) -> Self {
        Self {
            stage_name: stage_name.to_string(),
        }
    }

    /// Print the stage header at the start of execution
    pub fn print_header(&self, runtime: &str) {
        eprintln!(
            "\n{} {}",
            "===".bold().cyan(),
            format!("Stage: {}", self.stage_name).bold().cyan()
        );
        eprintln!("  {} {}", "Runtime:".dimmed(), runtime);
        eprintln!("{}", "─".repeat(50).dimmed());
    }

    /// Print an informational line
    pub fn info(&self, message: &str) {
        eprintln!("  {} {}", "·".dimmed(), message.dimmed());
    }

    /// Announce that a step is starting
    pub fn step_started(&self, message: &str) {
        eprintln!("  {} {}", "▶".blue(), message.bold());
    }

    /// Report how a step ended
    pub fn step_finished(&self, label: &str, duration: Duration, success: bool) {
        let marker = if success {
            "✓".green().bold()
        } else {
            "✗".red().bold()
        };
        eprintln!(
            "  {marker} {label} {}",
            format!("({})", format_duration(duration)).dimmed()
        );
    }

    /// Print the states a deployment passed through
    pub fn print_trace(&self, trace: &DeployTrace) {
        eprintln!("  {} {}", "Trace:".dimmed(), trace.render());
    }

    /// Render the post-stage summary
    pub fn print_summary(&self, success: bool, duration: Duration) {
        eprintln!("{}", "─".repeat(50).dimmed());

        let status = if success {
            "COMPLETED".green().bold().to_string()
        } else {
            "FAILED".red().bold().to_string()
        };
        eprintln!(
            "  {} {} {}",
            status,
            self.stage_name.bold(),
            format!("in {}", format_duration(duration)).dimmed()
        );
        eprintln!();
    }
}

/// Format a duration as `1m 05s`, `12.3s` or `450ms`
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let secs = duration.as_secs();
    if secs < 60 {
        return format!("{:.1}s", duration.as_secs_f64());
    }
    format!("{}m {:02}s", secs / 60, secs % 60)
}
