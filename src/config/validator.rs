//! Configuration validation

use super::*;
use crate::config::cli::ExecutionMode;
use crate::distributed::protocol::LENGTH_PREFIX_BYTES;
use anyhow::Result;
use std::collections::HashSet;
use tracing::warn;

/// Smallest frame limit that still fits a useful task or reply
pub const MIN_FRAME_BYTES: usize = 1024;

/// Validate complete configuration for the given execution mode
pub fn validate_config(config: &Config, mode: ExecutionMode) -> Result<()> {
    match mode {
        ExecutionMode::Worker => validate_worker(&config.worker)?,
        ExecutionMode::Dispatch => {
            validate_coordinator(&config.coordinator)?;
            validate_roster(&config.coordinator.roster)?;
        }
        // Local mode builds its roster from the pool
        ExecutionMode::Local => {
            validate_worker(&config.worker)?;
            validate_coordinator(&config.coordinator)?;
        }
    }

    Ok(())
}

/// Validate worker service configuration
pub fn validate_worker(worker: &WorkerConfig) -> Result<()> {
    if worker.host.trim().is_empty() {
        anyhow::bail!("worker host must not be empty");
    }

    if let Some(ref id) = worker.node_id {
        if id.trim().is_empty() {
            anyhow::bail!("worker node_id must not be empty when set");
        }
    }

    if worker.io_timeout_ms == 0 {
        anyhow::bail!("worker io_timeout_ms must be greater than 0");
    }

    validate_frame_limit(worker.max_frame_bytes, "worker")?;

    Ok(())
}

/// Validate coordinator settings other than the roster
pub fn validate_coordinator(coordinator: &CoordinatorConfig) -> Result<()> {
    if coordinator.connect_timeout_ms == 0 {
        anyhow::bail!("connect_timeout_ms must be greater than 0");
    }

    if coordinator.request_timeout_ms == 0 {
        anyhow::bail!("request_timeout_ms must be greater than 0");
    }

    validate_frame_limit(coordinator.max_frame_bytes, "coordinator")?;

    Ok(())
}

/// Validate the worker roster
///
/// Duplicate entries are allowed: each one receives its own copy of the task.
pub fn validate_roster(roster: &[WorkerAddr]) -> Result<()> {
    if roster.is_empty() {
        anyhow::bail!("No workers specified (use --host-list, --roster-file or [coordinator] roster)");
    }

    for (i, addr) in roster.iter().enumerate() {
        if addr.port == 0 {
            anyhow::bail!("Roster entry {} ({}) has port 0", i, addr);
        }
    }

    let mut seen = HashSet::new();
    for addr in roster {
        if !seen.insert(addr) {
            warn!(worker = %addr, "worker appears more than once in roster");
        }
    }

    Ok(())
}

fn validate_frame_limit(max_frame_bytes: usize, role: &str) -> Result<()> {
    if max_frame_bytes < MIN_FRAME_BYTES {
        anyhow::bail!(
            "{} max_frame_bytes must be at least {}, got {}",
            role,
            MIN_FRAME_BYTES,
            max_frame_bytes
        );
    }

    // Length prefix is a u32
    let limit = u32::MAX as u64 - LENGTH_PREFIX_BYTES as u64;
    if max_frame_bytes as u64 > limit {
        anyhow::bail!(
            "{} max_frame_bytes must be at most {}, got {}",
            role,
            limit,
            max_frame_bytes
        );
    }

    Ok(())
}
