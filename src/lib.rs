//! taskcast - Broadcast task dispatch over TCP
//!
//! A coordinator holds a fixed roster of worker endpoints and sends the same
//! task to every one of them, collecting one outcome per worker in roster
//! order. A worker that can't be reached is recorded, never fatal.
//!
//! # Architecture
//!
//! - **Tasks**: named operations plus JSON-like arguments; only data crosses the wire
//! - **Operation registry**: worker-local table of arity-checked handlers
//! - **Worker service**: one task per connection, length-prefixed MessagePack frames
//! - **Dispatch coordinator**: sequential or concurrent fan-out with per-attempt timeouts
//! - **Worker pool**: supervised in-process workers for local runs

pub mod config;
pub mod distributed;
pub mod output;
pub mod task;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{DispatchCoordinator, DispatchOutcome, WorkerAddr, WorkerPool, WorkerService};
pub use task::{ResultEnvelope, TaskDescriptor};

/// Result type used throughout taskcast
pub type Result<T> = anyhow::Result<T>;
