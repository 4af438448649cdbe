//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Worker mode - serve tasks from coordinators
    Worker,
    /// Dispatch mode - broadcast one task to every worker in the roster
    Dispatch,
    /// Local mode - start a pool of workers in-process and dispatch to them
    Local,
}

/// taskcast - broadcast task dispatch
#[derive(Parser, Debug)]
#[command(name = "taskcast")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: worker, dispatch, or local
    #[arg(long, value_enum, default_value = "dispatch")]
    pub mode: ExecutionMode,

    // === Configuration File ===
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Worker Options ===
    /// Address for the worker service to bind (worker and local modes)
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the worker service to listen on (0 picks an ephemeral port)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Node identifier reported in replies (defaults to the hostname)
    #[arg(long)]
    pub node_id: Option<String>,

    // === Roster Options ===
    /// Comma-separated list of worker addresses (e.g., "10.0.1.10:5000,10.0.1.11:5000")
    #[arg(long)]
    pub host_list: Option<String>,

    /// File containing worker addresses (one per line, '#' starts a comment)
    #[arg(long)]
    pub roster_file: Option<PathBuf>,

    /// Port used for roster entries that don't name one
    #[arg(long, default_value = "5000")]
    pub worker_port: u16,

    // === Timeouts ===
    /// Connect timeout per worker (e.g., 500ms, 2s)
    #[arg(long)]
    pub connect_timeout: Option<String>,

    /// Request timeout per worker, covering send and reply (e.g., 30s, 1m)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Largest frame accepted or sent (e.g., 64M)
    #[arg(long)]
    pub max_frame_size: Option<String>,

    // === Task Options ===
    /// Operation name to invoke on every worker
    #[arg(short = 'o', long)]
    pub operation: Option<String>,

    /// Positional arguments as a JSON array (e.g., '[5, 3]')
    #[arg(short = 'a', long)]
    pub args: Option<String>,

    /// Named arguments as a JSON object (e.g., '{"sep": ","}')
    #[arg(short = 'k', long)]
    pub kwargs: Option<String>,

    // === Dispatch Options ===
    /// Fan-out strategy
    #[arg(long, value_enum)]
    pub fan_out: Option<FanOutMode>,

    /// Number of in-process workers (local mode only)
    #[arg(short = 'w', long, default_value = "2")]
    pub workers: usize,

    // === Output Options ===
    /// Result output format
    #[arg(long, value_enum)]
    pub output: Option<OutputMode>,

    /// Exit with a non-zero status unless every worker returned Ok
    #[arg(long)]
    pub strict: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Fan-out strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FanOutMode {
    /// Contact workers one after another
    Sequential,
    /// Contact all workers at once
    Concurrent,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-readable table
    Text,
    /// JSON document
    Json,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        // Worker mode only needs bind settings
        if self.mode == ExecutionMode::Worker {
            if self.operation.is_some() || self.args.is_some() || self.kwargs.is_some() {
                anyhow::bail!("--operation, --args and --kwargs are not used in worker mode");
            }
            return Ok(());
        }

        if self.operation.is_none() {
            anyhow::bail!("--operation is required in {:?} mode", self.mode);
        }

        if self.mode == ExecutionMode::Local {
            if self.workers == 0 {
                anyhow::bail!("workers must be at least 1");
            }
            if self.host_list.is_some() || self.roster_file.is_some() {
                anyhow::bail!("--host-list and --roster-file are not used in local mode");
            }
        }

        if self.host_list.is_some() && self.roster_file.is_some() {
            anyhow::bail!("can only specify one of: --host-list or --roster-file");
        }

        Ok(())
    }
}
