//! Distributed dispatch
//!
//! This module implements broadcast task dispatch across worker processes.
//!
//! # Architecture
//!
//! taskcast uses a coordinator-worker architecture:
//!
//! - **Coordinator**: Holds the worker roster, broadcasts a task, collects outcomes
//! - **Worker Service**: Accepts connections, executes one task per connection
//! - **Worker Pool**: Supervised set of in-process workers (local mode)
//!
//! # Modules
//!
//! - `protocol`: Message definitions, framing and serialization
//! - `worker_service`: Worker service implementation
//! - `coordinator`: Dispatch coordinator and roster entries
//! - `supervisor`: Local worker pool

pub mod coordinator;
pub mod protocol;
pub mod supervisor;
pub mod worker_service;

// Re-export key types
pub use coordinator::{
    DispatchCoordinator, DispatchOutcome, DispatchReport, OutcomeStatus, TransportError, WorkerAddr,
};
pub use protocol::{
    DispatchMessage, FrameError, Message, OutcomeMessage, DEFAULT_MAX_FRAME_BYTES, PROTOCOL_VERSION,
};
pub use supervisor::WorkerPool;
pub use worker_service::WorkerService;
