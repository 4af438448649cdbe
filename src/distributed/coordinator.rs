//! Dispatch coordinator
//!
//! This module implements broadcast dispatch. The coordinator:
//! - Holds an immutable roster of worker addresses
//! - Opens a fresh connection per worker per dispatch
//! - Sends the same task to every worker (sequentially or concurrently)
//! - Collects one outcome per worker, in roster order
//!
//! A worker that cannot be reached, times out or sends a malformed reply gets
//! an [`DispatchOutcome::Unreachable`] slot. That never aborts the batch.

use crate::config::{CoordinatorConfig, FanOut};
use crate::distributed::protocol::*;
use crate::task::{ResultEnvelope, TaskDescriptor};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Worker roster entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerAddr {
    pub host: String,
    pub port: u16,
}

impl WorkerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, or a bare `host` using `default_port`
    ///
    /// IPv6 hosts with a port use brackets: `[::1]:5000`.
    pub fn parse_with_default_port(s: &str, default_port: Option<u16>) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("Empty worker address");
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .with_context(|| format!("Unterminated '[' in worker address: {}", s))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => anyhow::bail!("Invalid worker address: {}", s),
            }
        } else if s.matches(':').count() > 1 {
            // Bare IPv6 literal without a port
            (s, None)
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            anyhow::bail!("Missing host in worker address: {}", s);
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .with_context(|| format!("Invalid port in worker address: {}", s))?,
            None => default_port
                .with_context(|| format!("Missing port in worker address: {}", s))?,
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for WorkerAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for WorkerAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with_default_port(s, None)
    }
}

impl TryFrom<String> for WorkerAddr {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<WorkerAddr> for String {
    fn from(addr: WorkerAddr) -> Self {
        addr.to_string()
    }
}

/// Why a worker produced no envelope
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: WorkerAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out after {after:?}")]
    ConnectTimeout { addr: WorkerAddr, after: Duration },

    #[error("no reply from {addr} within {after:?}")]
    RequestTimeout { addr: WorkerAddr, after: Duration },

    #[error("failed to send task to {addr}: {source}")]
    Send {
        addr: WorkerAddr,
        #[source]
        source: FrameError,
    },

    #[error("failed to receive reply from {addr}: {source}")]
    Receive {
        addr: WorkerAddr,
        #[source]
        source: FrameError,
    },

    #[error("malformed reply from {addr}: {reason}")]
    MalformedReply { addr: WorkerAddr, reason: String },

    #[error("dispatch to {addr} aborted: {reason}")]
    Aborted { addr: WorkerAddr, reason: String },
}

/// Outcome status, as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Ok,
    Err,
    Unreachable,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OutcomeStatus::Ok => write!(f, "OK"),
            OutcomeStatus::Err => write!(f, "ERR"),
            OutcomeStatus::Unreachable => write!(f, "UNREACHABLE"),
        }
    }
}

/// Result of dispatching to one worker
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The worker ran (or rejected) the task and replied
    Completed {
        node_id: String,
        envelope: ResultEnvelope,
    },
    /// No reply could be obtained from the worker
    Unreachable(TransportError),
}

impl DispatchOutcome {
    pub fn status(&self) -> OutcomeStatus {
        match self {
            DispatchOutcome::Completed { envelope, .. } if envelope.is_ok() => OutcomeStatus::Ok,
            DispatchOutcome::Completed { .. } => OutcomeStatus::Err,
            DispatchOutcome::Unreachable(_) => OutcomeStatus::Unreachable,
        }
    }

    pub fn envelope(&self) -> Option<&ResultEnvelope> {
        match self {
            DispatchOutcome::Completed { envelope, .. } => Some(envelope),
            DispatchOutcome::Unreachable(_) => None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, DispatchOutcome::Unreachable(_))
    }
}

/// Per-attempt limits, copied into every dispatch task
#[derive(Debug, Clone, Copy)]
struct AttemptLimits {
    connect_timeout: Duration,
    request_timeout: Duration,
    max_frame_bytes: usize,
}

/// Dispatch coordinator
///
/// Broadcasts tasks to a fixed roster of workers.
#[derive(Debug)]
pub struct DispatchCoordinator {
    roster: Vec<WorkerAddr>,
    fan_out: FanOut,
    limits: AttemptLimits,
}

impl DispatchCoordinator {
    /// Create a coordinator for the roster in `config`
    pub fn new(config: &CoordinatorConfig) -> Result<Self> {
        if config.roster.is_empty() {
            anyhow::bail!("No workers specified for dispatch");
        }

        Ok(Self {
            roster: config.roster.clone(),
            fan_out: config.fan_out,
            limits: AttemptLimits {
                connect_timeout: config.connect_timeout(),
                request_timeout: config.request_timeout(),
                max_frame_bytes: config.max_frame_bytes,
            },
        })
    }

    pub fn roster(&self) -> &[WorkerAddr] {
        &self.roster
    }

    pub fn fan_out(&self) -> FanOut {
        self.fan_out
    }

    /// Send `task` to every worker and collect outcomes in roster order
    ///
    /// Fails only if the task itself cannot be encoded; per-worker failures
    /// are reported as [`DispatchOutcome::Unreachable`] slots.
    pub async fn dispatch(&self, task: &TaskDescriptor) -> Result<Vec<DispatchOutcome>> {
        let frame = encode_message(&Message::Dispatch(DispatchMessage::new(task.clone())))
            .with_context(|| format!("Failed to encode task {}", task.operation))?;
        if frame.len() - LENGTH_PREFIX_BYTES > self.limits.max_frame_bytes {
            anyhow::bail!(
                "Task {} is too large: {} bytes (max {})",
                task.operation,
                frame.len() - LENGTH_PREFIX_BYTES,
                self.limits.max_frame_bytes
            );
        }

        info!(task = %task.operation, workers = self.roster.len(), fan_out = ?self.fan_out, "dispatching task");

        let outcomes = match self.fan_out {
            FanOut::Sequential => {
                let mut outcomes = Vec::with_capacity(self.roster.len());
                for addr in &self.roster {
                    outcomes.push(attempt(addr.clone(), &frame, self.limits).await);
                }
                outcomes
            }
            FanOut::Concurrent => {
                let frame = Arc::new(frame);
                let handles: Vec<_> = self
                    .roster
                    .iter()
                    .map(|addr| {
                        let addr = addr.clone();
                        let frame = frame.clone();
                        let limits = self.limits;
                        tokio::spawn(async move { attempt(addr, &frame, limits).await })
                    })
                    .collect();

                // Awaited in roster order; completion order does not matter
                let mut outcomes = Vec::with_capacity(handles.len());
                for (addr, handle) in self.roster.iter().zip(handles) {
                    let outcome = handle.await.unwrap_or_else(|e| {
                        DispatchOutcome::Unreachable(TransportError::Aborted {
                            addr: addr.clone(),
                            reason: e.to_string(),
                        })
                    });
                    outcomes.push(outcome);
                }
                outcomes
            }
        };

        let unreachable = outcomes.iter().filter(|o| o.is_unreachable()).count();
        info!(task = %task.operation, workers = outcomes.len(), unreachable, "dispatch complete");

        Ok(outcomes)
    }

    /// Dispatch and wrap the outcomes with timing information
    pub async fn dispatch_report(&self, task: &TaskDescriptor) -> Result<DispatchReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let outcomes = self.dispatch(task).await?;

        Ok(DispatchReport {
            task: task.clone(),
            started_at,
            elapsed: start.elapsed(),
            entries: self.roster.iter().cloned().zip(outcomes).collect(),
        })
    }
}

/// One request/response cycle against one worker
async fn attempt(addr: WorkerAddr, frame: &[u8], limits: AttemptLimits) -> DispatchOutcome {
    let outcome = match connect_and_exchange(&addr, frame, limits).await {
        Ok(outcome) => outcome,
        Err(e) => DispatchOutcome::Unreachable(e),
    };

    match &outcome {
        DispatchOutcome::Completed { node_id, envelope } => {
            debug!(worker = %addr, node_id = %node_id, ok = envelope.is_ok(), "worker replied");
        }
        DispatchOutcome::Unreachable(e) => {
            warn!(worker = %addr, error = %e, "worker unreachable");
        }
    }
    outcome
}

async fn connect_and_exchange(
    addr: &WorkerAddr,
    frame: &[u8],
    limits: AttemptLimits,
) -> std::result::Result<DispatchOutcome, TransportError> {
    let mut stream = match timeout(
        limits.connect_timeout,
        TcpStream::connect((addr.host.as_str(), addr.port)),
    )
    .await
    {
        Err(_) => {
            return Err(TransportError::ConnectTimeout {
                addr: addr.clone(),
                after: limits.connect_timeout,
            })
        }
        Ok(Err(source)) => {
            return Err(TransportError::Connect {
                addr: addr.clone(),
                source,
            })
        }
        Ok(Ok(stream)) => stream,
    };

    // Connection closes when `stream` drops at the end of this cycle
    match timeout(limits.request_timeout, exchange(&mut stream, addr, frame, limits)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::RequestTimeout {
            addr: addr.clone(),
            after: limits.request_timeout,
        }),
    }
}

async fn exchange(
    stream: &mut TcpStream,
    addr: &WorkerAddr,
    frame: &[u8],
    limits: AttemptLimits,
) -> std::result::Result<DispatchOutcome, TransportError> {
    write_frame(stream, frame)
        .await
        .map_err(|source| TransportError::Send {
            addr: addr.clone(),
            source,
        })?;

    let reply = match read_message(stream, limits.max_frame_bytes).await {
        Ok(reply) => reply,
        Err(e @ (FrameError::Decode(_) | FrameError::TooLarge { .. })) => {
            return Err(TransportError::MalformedReply {
                addr: addr.clone(),
                reason: e.to_string(),
            })
        }
        Err(source) => {
            return Err(TransportError::Receive {
                addr: addr.clone(),
                source,
            })
        }
    };

    match reply {
        Message::Outcome(outcome) => Ok(DispatchOutcome::Completed {
            node_id: outcome.node_id,
            envelope: outcome.envelope,
        }),
        other => Err(TransportError::MalformedReply {
            addr: addr.clone(),
            reason: format!("expected Outcome, got {}", other.kind()),
        }),
    }
}

/// Outcomes of one dispatch, with the task and timing
#[derive(Debug)]
pub struct DispatchReport {
    pub task: TaskDescriptor,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Roster entries paired with their outcomes, in roster order
    pub entries: Vec<(WorkerAddr, DispatchOutcome)>,
}

impl DispatchReport {
    /// Number of outcomes with the given status
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.entries
            .iter()
            .filter(|(_, outcome)| outcome.status() == status)
            .count()
    }

    pub fn all_ok(&self) -> bool {
        self.count(OutcomeStatus::Ok) == self.entries.len()
    }
}
