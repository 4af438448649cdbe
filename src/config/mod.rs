//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! A configuration file has one section per role; every field has a default,
//! so an empty file is valid:
//!
//! ```toml
//! [worker]
//! host = "0.0.0.0"
//! port = 5000
//! io_timeout_ms = 30000
//!
//! [coordinator]
//! roster = ["10.0.1.10:5000", "10.0.1.11:5000"]
//! connect_timeout_ms = 2000
//! request_timeout_ms = 30000
//! fan_out = "concurrent"
//!
//! [output]
//! format = "text"
//! ```

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use crate::distributed::coordinator::WorkerAddr;
use crate::distributed::protocol::DEFAULT_MAX_FRAME_BYTES;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Worker service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Address to bind
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Node identifier reported in replies (defaults to the hostname)
    pub node_id: Option<String>,
    /// Limit for reading a task frame and writing the reply
    pub io_timeout_ms: u64,
    /// Largest accepted task frame
    pub max_frame_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            node_id: None,
            io_timeout_ms: 30_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl WorkerConfig {
    /// `host:port` string for binding
    pub fn bind_address(&self) -> String {
        WorkerAddr::new(self.host.clone(), self.port).to_string()
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Dispatch coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Worker roster, in dispatch order
    pub roster: Vec<WorkerAddr>,
    /// Limit for establishing each worker connection
    pub connect_timeout_ms: u64,
    /// Limit for sending the task and receiving the reply
    pub request_timeout_ms: u64,
    /// Whether workers are contacted one at a time or all at once
    pub fan_out: FanOut,
    /// Largest accepted reply frame (and largest task sent)
    pub max_frame_bytes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            roster: Vec::new(),
            connect_timeout_ms: 2_000,
            request_timeout_ms: 30_000,
            fan_out: FanOut::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl CoordinatorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Fan-out strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOut {
    /// One worker after another
    Sequential,
    /// All workers at once
    #[default]
    Concurrent,
}

impl fmt::Display for FanOut {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FanOut::Sequential => write!(f, "sequential"),
            FanOut::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// Result output configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Exit non-zero unless every worker returned Ok
    pub strict: bool,
}

/// Result output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.worker.port, 5000);
        assert_eq!(config.worker.bind_address(), "127.0.0.1:5000");
        assert_eq!(config.coordinator.fan_out, FanOut::Concurrent);
        assert_eq!(config.coordinator.connect_timeout(), Duration::from_secs(2));
        assert!(config.coordinator.roster.is_empty());
        assert_eq!(config.output.format, OutputFormat::Text);
    }

    #[test]
    fn test_ipv6_bind_address() {
        let config = WorkerConfig {
            host: "::".to_string(),
            ..WorkerConfig::default()
        };
        assert_eq!(config.bind_address(), "[::]:5000");
    }
}
