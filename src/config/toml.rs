//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::{
    convert_fan_out, convert_output_format, parse_duration_ms, parse_host_list, parse_roster_file,
    parse_size,
};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the config file named on the command line, or defaults
pub fn load_config(cli: &Cli) -> Result<Config> {
    match cli.config {
        Some(ref path) => parse_toml_file(path),
        None => Ok(Config::default()),
    }
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Override worker settings
    if let Some(ref host) = cli.host {
        config.worker.host = host.clone();
    }
    if let Some(port) = cli.listen_port {
        config.worker.port = port;
    }
    if let Some(ref node_id) = cli.node_id {
        config.worker.node_id = Some(node_id.clone());
    }

    // Override roster (a CLI roster replaces the file's roster entirely)
    if let Some(ref list) = cli.host_list {
        config.coordinator.roster = parse_host_list(list, cli.worker_port)?;
    } else if let Some(ref path) = cli.roster_file {
        config.coordinator.roster = parse_roster_file(path, cli.worker_port)?;
    }

    // Override timeouts
    if let Some(ref s) = cli.connect_timeout {
        config.coordinator.connect_timeout_ms = parse_duration_ms(s)?;
    }
    if let Some(ref s) = cli.timeout {
        let ms = parse_duration_ms(s)?;
        config.coordinator.request_timeout_ms = ms;
        config.worker.io_timeout_ms = ms;
    }

    // Frame limit applies to both roles
    if let Some(ref s) = cli.max_frame_size {
        let bytes = usize::try_from(parse_size(s)?)
            .with_context(|| format!("Frame size out of range: {}", s))?;
        config.worker.max_frame_bytes = bytes;
        config.coordinator.max_frame_bytes = bytes;
    }

    if let Some(mode) = cli.fan_out {
        config.coordinator.fan_out = convert_fan_out(mode);
    }

    // Override output settings
    if let Some(mode) = cli.output {
        config.output.format = convert_output_format(mode);
    }
    if cli.strict {
        config.output.strict = true;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("taskcast").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_toml_empty() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_toml_basic() {
        let toml = r#"
[worker]
host = "0.0.0.0"
port = 6000
node_id = "rack1-a"

[coordinator]
roster = ["10.0.1.10:5000", "[::1]:5001"]
connect_timeout_ms = 500
fan_out = "sequential"

[output]
format = "json"
"#;

        let config = parse_toml_string(toml).unwrap();
        assert_eq!(config.worker.bind_address(), "0.0.0.0:6000");
        assert_eq!(config.worker.node_id.as_deref(), Some("rack1-a"));
        assert_eq!(config.worker.io_timeout_ms, 30_000);
        assert_eq!(
            config.coordinator.roster,
            vec![WorkerAddr::new("10.0.1.10", 5000), WorkerAddr::new("::1", 5001)]
        );
        assert_eq!(config.coordinator.connect_timeout_ms, 500);
        assert_eq!(config.coordinator.request_timeout_ms, 30_000);
        assert_eq!(config.coordinator.fan_out, FanOut::Sequential);
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_toml_rejects_bad_roster() {
        let toml = r#"
[coordinator]
roster = ["10.0.1.10"]
"#;
        assert!(parse_toml_string(toml).is_err());
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[coordinator]").unwrap();
        writeln!(file, "request_timeout_ms = 1500").unwrap();

        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.coordinator.request_timeout_ms, 1500);

        let missing = file.path().with_extension("missing");
        let err = parse_toml_file(&missing).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_merge_cli_overrides_file() {
        let config = parse_toml_string(
            r#"
[coordinator]
roster = ["10.0.1.10:5000"]
connect_timeout_ms = 500
"#,
        )
        .unwrap();

        let merged = merge_cli_with_config(
            &cli(&[
                "--host-list",
                "a,b:6001",
                "--worker-port",
                "7000",
                "--timeout",
                "2s",
                "--fan-out",
                "sequential",
                "--max-frame-size",
                "1M",
                "--output",
                "json",
                "--operation",
                "echo",
            ]),
            config,
        )
        .unwrap();

        assert_eq!(
            merged.coordinator.roster,
            vec![WorkerAddr::new("a", 7000), WorkerAddr::new("b", 6001)]
        );
        assert_eq!(merged.coordinator.connect_timeout_ms, 500);
        assert_eq!(merged.coordinator.request_timeout_ms, 2000);
        assert_eq!(merged.worker.io_timeout_ms, 2000);
        assert_eq!(merged.coordinator.fan_out, FanOut::Sequential);
        assert_eq!(merged.coordinator.max_frame_bytes, 1024 * 1024);
        assert_eq!(merged.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_merge_keeps_file_values_without_flags() {
        let config = parse_toml_string(
            r#"
[worker]
port = 6000
"#,
        )
        .unwrap();

        let merged = merge_cli_with_config(&cli(&["--mode", "worker"]), config.clone()).unwrap();
        assert_eq!(merged, config);
    }
}
