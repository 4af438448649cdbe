//! JSON output formatting
//!
//! One document per dispatch: the task, timing, per-status counts and one
//! entry per roster slot, in roster order.

use crate::distributed::coordinator::{DispatchOutcome, DispatchReport, OutcomeStatus};
use crate::task::{ResultEnvelope, TaskDescriptor};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = d.as_micros() as u64;
        let human = format_duration_human(d);
        Self { micros, human }
    }
}

/// Per-status counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub total: usize,
    pub ok: usize,
    pub err: usize,
    pub unreachable: usize,
}

/// One roster slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonOutcome {
    pub index: usize,
    pub worker: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete dispatch report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub task: TaskDescriptor,
    /// RFC 3339 start time
    pub started_at: String,
    pub elapsed: JsonDuration,
    pub summary: JsonSummary,
    pub results: Vec<JsonOutcome>,
}

/// Convert a dispatch report into its JSON form
pub fn report_to_json(report: &DispatchReport) -> JsonReport {
    let results = report
        .entries
        .iter()
        .enumerate()
        .map(|(index, (addr, outcome))| {
            let mut entry = JsonOutcome {
                index,
                worker: addr.to_string(),
                status: outcome.status(),
                node_id: None,
                value: None,
                error: None,
            };
            match outcome {
                DispatchOutcome::Completed { node_id, envelope } => {
                    entry.node_id = Some(node_id.clone());
                    match envelope {
                        ResultEnvelope::Ok(value) => entry.value = Some(value.clone()),
                        ResultEnvelope::Err(message) => entry.error = Some(message.clone()),
                    }
                }
                DispatchOutcome::Unreachable(e) => entry.error = Some(e.to_string()),
            }
            entry
        })
        .collect();

    JsonReport {
        task: report.task.clone(),
        started_at: report.started_at.to_rfc3339(),
        elapsed: JsonDuration::from_duration(report.elapsed),
        summary: JsonSummary {
            total: report.entries.len(),
            ok: report.count(OutcomeStatus::Ok),
            err: report.count(OutcomeStatus::Err),
            unreachable: report.count(OutcomeStatus::Unreachable),
        },
        results,
    }
}

/// Print the report to stdout as pretty JSON
pub fn print_json(report: &DispatchReport) -> Result<()> {
    let doc = report_to_json(report);
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// Format duration in human-readable format
fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros() as u64;

    if micros == 0 {
        return "0µs".to_string();
    }

    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else if micros < 60_000_000 {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    } else {
        format!("{:.2}m", micros as f64 / 60_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::coordinator::{TransportError, WorkerAddr};
    use chrono::Utc;
    use serde_json::json;

    fn sample_report() -> DispatchReport {
        let a = WorkerAddr::new("10.0.1.10", 5000);
        let b = WorkerAddr::new("10.0.1.11", 5000);
        let c = WorkerAddr::new("10.0.1.12", 5000);
        DispatchReport {
            task: TaskDescriptor::new("divide").arg(8).arg(2),
            started_at: Utc::now(),
            elapsed: Duration::from_millis(12),
            entries: vec![
                (
                    a,
                    DispatchOutcome::Completed {
                        node_id: "node-a".to_string(),
                        envelope: ResultEnvelope::ok(4),
                    },
                ),
                (
                    b,
                    DispatchOutcome::Completed {
                        node_id: "node-b".to_string(),
                        envelope: ResultEnvelope::err("division by zero"),
                    },
                ),
                (
                    c.clone(),
                    DispatchOutcome::Unreachable(TransportError::ConnectTimeout {
                        addr: c,
                        after: Duration::from_secs(2),
                    }),
                ),
            ],
        }
    }

    #[test]
    fn test_report_to_json() {
        let doc = serde_json::to_value(report_to_json(&sample_report())).unwrap();

        assert_eq!(doc["task"]["operation"], json!("divide"));
        assert_eq!(doc["summary"], json!({ "total": 3, "ok": 1, "err": 1, "unreachable": 1 }));
        assert_eq!(doc["elapsed"]["micros"], json!(12_000));

        let results = doc["results"].as_array().unwrap();
        assert_eq!(results[0]["status"], json!("Ok"));
        assert_eq!(results[0]["value"], json!(4));
        assert_eq!(results[0]["node_id"], json!("node-a"));
        assert!(results[0].get("error").is_none());

        assert_eq!(results[1]["status"], json!("Err"));
        assert_eq!(results[1]["error"], json!("division by zero"));
        assert!(results[1].get("value").is_none());

        assert_eq!(results[2]["status"], json!("Unreachable"));
        assert_eq!(results[2]["worker"], json!("10.0.1.12:5000"));
        assert!(results[2].get("node_id").is_none());
        assert!(results[2]["error"].as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn test_format_duration_human() {
        assert_eq!(format_duration_human(Duration::ZERO), "0µs");
        assert_eq!(format_duration_human(Duration::from_micros(250)), "250µs");
        assert_eq!(format_duration_human(Duration::from_millis(12)), "12.000ms");
        assert_eq!(format_duration_human(Duration::from_secs(2)), "2.000s");
    }
}
