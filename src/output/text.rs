//! Human-readable text output

use crate::distributed::coordinator::{DispatchOutcome, DispatchReport, OutcomeStatus};
use crate::task::ResultEnvelope;
use std::fmt::Write;

/// Print dispatch results to console
pub fn print_report(report: &DispatchReport) {
    print!("{}", format_report(report));
}

/// Render dispatch results as a block of text
///
/// One line per roster slot, in roster order, followed by per-status counts.
pub fn format_report(report: &DispatchReport) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");
    let _ = writeln!(out, "                    DISPATCH RESULTS");
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");
    let _ = writeln!(out);
    let _ = writeln!(out, "Task:    {}", report.task);
    let _ = writeln!(out, "Started: {}", report.started_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
    let _ = writeln!(out, "Elapsed: {:.3}s", report.elapsed.as_secs_f64());
    let _ = writeln!(out);

    let width = report
        .entries
        .iter()
        .map(|(addr, _)| addr.to_string().len())
        .max()
        .unwrap_or(0);

    for (index, (addr, outcome)) in report.entries.iter().enumerate() {
        let detail = match outcome {
            DispatchOutcome::Completed { node_id, envelope } => match envelope {
                ResultEnvelope::Ok(value) => format!("{} ({})", value, node_id),
                ResultEnvelope::Err(message) => format!("{} ({})", message, node_id),
            },
            DispatchOutcome::Unreachable(e) => e.to_string(),
        };
        let _ = writeln!(
            out,
            "  [{}] {:<width$}  {:<11}  {}",
            index,
            addr.to_string(),
            outcome.status().to_string(),
            detail,
            width = width
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Workers: {} total, {} ok, {} err, {} unreachable",
        report.entries.len(),
        report.count(OutcomeStatus::Ok),
        report.count(OutcomeStatus::Err),
        report.count(OutcomeStatus::Unreachable)
    );
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");

    out
}
