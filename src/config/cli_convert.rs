//! CLI to Config conversion utilities

use crate::config::{cli, FanOut, OutputFormat};
use crate::distributed::coordinator::WorkerAddr;
use crate::task::TaskDescriptor;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Parse a size string (e.g., "64M", "512k", "1G") to bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("k") || s.ends_with("kb") {
        (s.trim_end_matches("kb").trim_end_matches("k"), 1024u64)
    } else if s.ends_with("m") || s.ends_with("mb") {
        (s.trim_end_matches("mb").trim_end_matches("m"), 1024 * 1024)
    } else if s.ends_with("g") || s.ends_with("gb") {
        (s.trim_end_matches("gb").trim_end_matches("g"), 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str.parse()
        .with_context(|| format!("Invalid size format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Size out of range: {}", s))
}

/// Parse a duration string (e.g., "500ms", "2s", "1m") to milliseconds
///
/// A bare number is taken as milliseconds.
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("ms") {
        (s.trim_end_matches("ms"), 1u64)
    } else if s.ends_with("s") || s.ends_with("sec") {
        (s.trim_end_matches("sec").trim_end_matches("s"), 1000)
    } else if s.ends_with("m") || s.ends_with("min") {
        (s.trim_end_matches("min").trim_end_matches("m"), 60_000)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str.parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Duration out of range: {}", s))
}

/// Parse a comma-separated host list into roster entries
pub fn parse_host_list(list: &str, default_port: u16) -> Result<Vec<WorkerAddr>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| WorkerAddr::parse_with_default_port(s, Some(default_port)))
        .collect()
}

/// Read roster entries from a file, one address per line
///
/// Blank lines and lines starting with '#' are skipped.
pub fn parse_roster_file(path: &Path, default_port: u16) -> Result<Vec<WorkerAddr>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read roster file: {}", path.display()))?;

    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(lineno, line)| {
            WorkerAddr::parse_with_default_port(line, Some(default_port))
                .with_context(|| format!("{}:{}", path.display(), lineno))
        })
        .collect()
}

/// Parse `--args` as a JSON array
pub fn parse_positional_args(s: &str) -> Result<Vec<Value>> {
    match serde_json::from_str(s).with_context(|| format!("Invalid JSON in --args: {}", s))? {
        Value::Array(values) => Ok(values),
        other => anyhow::bail!("--args must be a JSON array, got {}", other),
    }
}

/// Parse `--kwargs` as a JSON object
pub fn parse_named_args(s: &str) -> Result<BTreeMap<String, Value>> {
    match serde_json::from_str(s).with_context(|| format!("Invalid JSON in --kwargs: {}", s))? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => anyhow::bail!("--kwargs must be a JSON object, got {}", other),
    }
}

/// Build the task descriptor from the CLI task flags
pub fn build_task(cli: &cli::Cli) -> Result<TaskDescriptor> {
    let operation = cli
        .operation
        .as_deref()
        .context("--operation is required")?;

    let mut task = TaskDescriptor::new(operation);
    if let Some(ref args) = cli.args {
        task.positional_args = parse_positional_args(args)?;
    }
    if let Some(ref kwargs) = cli.kwargs {
        task.named_args = parse_named_args(kwargs)?;
    }
    Ok(task)
}

/// Convert CLI FanOutMode to config FanOut
pub fn convert_fan_out(mode: cli::FanOutMode) -> FanOut {
    match mode {
        cli::FanOutMode::Sequential => FanOut::Sequential,
        cli::FanOutMode::Concurrent => FanOut::Concurrent,
    }
}

/// Convert CLI OutputMode to config OutputFormat
pub fn convert_output_format(mode: cli::OutputMode) -> OutputFormat {
    match mode {
        cli::OutputMode::Text => OutputFormat::Text,
        cli::OutputMode::Json => OutputFormat::Json,
    }
}
