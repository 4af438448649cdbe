//! Task model
//!
//! A [`TaskDescriptor`] names an operation registered on the workers and carries
//! only argument data. A [`ResultEnvelope`] carries the outcome of running it
//! back to the coordinator.
//!
//! Neither type embeds executable code: the operation identifier is resolved
//! against the worker's process-local [`OperationRegistry`].

pub mod builtins;
pub mod registry;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use registry::{Args, Invocation, Operation, OperationRegistry, Param, Signature};

/// Serializable unit of remote work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Identifier of a registered operation
    pub operation: String,

    /// Arguments bound to parameters in declaration order
    #[serde(default)]
    pub positional_args: Vec<Value>,

    /// Arguments bound to parameters by name
    #[serde(default)]
    pub named_args: BTreeMap<String, Value>,
}

impl TaskDescriptor {
    /// Create a task with no arguments
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            positional_args: Vec::new(),
            named_args: BTreeMap::new(),
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional_args.push(value.into());
        self
    }

    /// Set a named argument, replacing any previous value for that name
    pub fn named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named_args.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.operation)?;
        let mut first = true;
        for value in &self.positional_args {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
            first = false;
        }
        for (name, value) in &self.named_args {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }
        write!(f, ")")
    }
}

/// Outcome of executing a task on one worker
///
/// Exactly one of value or error message exists, enforced by the enum shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultEnvelope {
    /// The operation returned a value
    Ok(Value),
    /// The task was rejected or the operation failed
    Err(String),
}

impl ResultEnvelope {
    pub fn ok(value: impl Into<Value>) -> Self {
        Self::Ok(value.into())
    }

    pub fn err(message: impl fmt::Display) -> Self {
        Self::Err(message.to_string())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Return value, present iff status is Ok
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Err(_) => None,
        }
    }

    /// Failure description, present iff status is Err
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Err(message) => Some(message),
        }
    }
}

impl<E: fmt::Display> From<std::result::Result<Value, E>> for ResultEnvelope {
    fn from(result: std::result::Result<Value, E>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::err(e),
        }
    }
}

/// Task rejected before invocation
///
/// The worker converts these into Err envelopes; the `Display` text is the
/// message the coordinator receives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("arity mismatch for {operation}: {reason}")]
    Arity { operation: String, reason: String },

    #[error("malformed task: {0}")]
    Malformed(String),

    #[error("protocol version mismatch: coordinator={coordinator}, worker={worker}")]
    VersionMismatch { coordinator: u32, worker: u32 },

    #[error("unexpected message: expected Dispatch, got {0}")]
    UnexpectedMessage(&'static str),
}

/// Failure raised while an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in {0}")]
    Overflow(&'static str),

    #[error("argument '{name}' must be {expected}, got {actual}")]
    InvalidArgument {
        name: String,
        expected: &'static str,
        actual: String,
    },

    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}
