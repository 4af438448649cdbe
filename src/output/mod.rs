//! Result output
//!
//! Renders a [`DispatchReport`] for the user on stdout. Logging goes to
//! stderr through `tracing`; only final results are printed here.

pub mod json;
pub mod text;

use crate::config::{OutputConfig, OutputFormat};
use crate::distributed::coordinator::DispatchReport;
use crate::Result;

/// Print the report in the configured format
pub fn print_report(report: &DispatchReport, config: &OutputConfig) -> Result<()> {
    match config.format {
        OutputFormat::Text => {
            text::print_report(report);
            Ok(())
        }
        OutputFormat::Json => json::print_json(report),
    }
}
