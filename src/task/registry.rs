//! Operation registry
//!
//! Maps operation identifiers to arity-checked handlers. The registry is built
//! once when a worker starts and is shared read-only by every connection, so
//! lookups need no locking.
//!
//! # Argument binding
//!
//! Each operation declares a [`Signature`]: an ordered list of parameters, some
//! with defaults. Binding a task follows the usual call rules:
//!
//! - positional arguments fill parameters left to right
//! - named arguments fill parameters by name
//! - a parameter filled both ways, an unknown name, a surplus positional
//!   argument, or a missing required parameter is an arity mismatch
//!
//! Arity mismatches are reported as [`DecodeError::Arity`] before the handler
//! ever runs.

use super::{DecodeError, OperationError, TaskDescriptor};
use crate::Result;
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Handler body: receives bound arguments, returns a value or a failure
pub type Handler = dyn Fn(&Args) -> std::result::Result<Value, OperationError> + Send + Sync;

/// Declared operation parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: &'static str,
    default: Option<Value>,
}

impl Param {
    pub fn required(name: &'static str) -> Self {
        Self { name, default: None }
    }

    pub fn optional(name: &'static str, default: impl Into<Value>) -> Self {
        Self {
            name,
            default: Some(default.into()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Ordered parameter list of an operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    pub fn new(params: Vec<Param>) -> Self {
        Self { params }
    }

    /// Number of required parameters
    pub fn min_arity(&self) -> usize {
        self.params.iter().filter(|p| p.is_required()).count()
    }

    /// Total number of parameters
    pub fn max_arity(&self) -> usize {
        self.params.len()
    }

    /// Bind task arguments to this signature
    pub fn bind(
        &self,
        operation: &str,
        positional: &[Value],
        named: &BTreeMap<String, Value>,
    ) -> std::result::Result<Args, DecodeError> {
        let arity = |reason: String| DecodeError::Arity {
            operation: operation.to_string(),
            reason,
        };

        if positional.len() > self.max_arity() {
            let expected = if self.min_arity() == self.max_arity() {
                format!("expected {} arguments", self.max_arity())
            } else {
                format!("expected at most {} arguments", self.max_arity())
            };
            return Err(arity(format!("{}, got {} positional", expected, positional.len())));
        }

        if let Some(unknown) = named
            .keys()
            .find(|name| !self.params.iter().any(|p| p.name == name.as_str()))
        {
            return Err(arity(format!("unexpected named argument '{}'", unknown)));
        }

        let mut values = Vec::with_capacity(self.params.len());
        for (index, param) in self.params.iter().enumerate() {
            let value = match (positional.get(index), named.get(param.name)) {
                (Some(_), Some(_)) => {
                    return Err(arity(format!(
                        "argument '{}' given both positionally and by name",
                        param.name
                    )));
                }
                (Some(value), None) | (None, Some(value)) => value.clone(),
                (None, None) => match &param.default {
                    Some(default) => default.clone(),
                    None => return Err(arity(format!("missing argument '{}'", param.name))),
                },
            };
            values.push((param.name, value));
        }

        Ok(Args { values })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rendered: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.default {
                Some(default) => format!("{}={}", p.name, default),
                None => p.name.to_string(),
            })
            .collect();
        write!(f, "({})", rendered.join(", "))
    }
}

/// Arguments bound to an operation's parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    values: Vec<(&'static str, Value)>,
}

impl Args {
    pub fn get(&self, name: &str) -> std::result::Result<&Value, OperationError> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| OperationError::Failed(format!("argument '{}' is not bound", name)))
    }

    pub fn number(&self, name: &str) -> std::result::Result<&Number, OperationError> {
        match self.get(name)? {
            Value::Number(n) => Ok(n),
            other => Err(invalid(name, "a number", other)),
        }
    }

    pub fn str(&self, name: &str) -> std::result::Result<&str, OperationError> {
        match self.get(name)? {
            Value::String(s) => Ok(s),
            other => Err(invalid(name, "a string", other)),
        }
    }

    pub fn u64(&self, name: &str) -> std::result::Result<u64, OperationError> {
        let value = self.get(name)?;
        value
            .as_u64()
            .ok_or_else(|| invalid(name, "a non-negative integer", value))
    }

    pub fn array(&self, name: &str) -> std::result::Result<&[Value], OperationError> {
        match self.get(name)? {
            Value::Array(items) => Ok(items),
            other => Err(invalid(name, "an array", other)),
        }
    }
}

fn invalid(name: &str, expected: &'static str, actual: &Value) -> OperationError {
    OperationError::InvalidArgument {
        name: name.to_string(),
        expected,
        actual: type_name(actual).to_string(),
    }
}

/// JSON type name of a value, used in argument errors
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Registered operation
#[derive(Clone)]
pub struct Operation {
    name: String,
    signature: Signature,
    handler: Arc<Handler>,
}

impl Operation {
    pub fn new<F>(name: impl Into<String>, signature: Signature, handler: F) -> Self
    where
        F: Fn(&Args) -> std::result::Result<Value, OperationError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature,
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn call(&self, args: &Args) -> std::result::Result<Value, OperationError> {
        (self.handler)(args)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A resolved task, ready to run
#[derive(Debug, Clone)]
pub struct Invocation {
    operation: Operation,
    args: Args,
}

impl Invocation {
    pub fn operation(&self) -> &str {
        self.operation.name()
    }

    pub fn run(&self) -> std::result::Result<Value, OperationError> {
        self.operation.call(&self.args)
    }
}

/// Process-local table of invocable operations
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Operation>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation; names must be unique
    pub fn register(&mut self, operation: Operation) -> Result<()> {
        if self.operations.contains_key(operation.name()) {
            anyhow::bail!("Operation already registered: {}", operation.name());
        }
        self.operations.insert(operation.name().to_string(), operation);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Validate a task against the registry
    ///
    /// Checks that the operation exists and that the arguments satisfy its
    /// signature. Nothing is executed.
    pub fn resolve(&self, task: &TaskDescriptor) -> std::result::Result<Invocation, DecodeError> {
        let operation = self
            .get(&task.operation)
            .ok_or_else(|| DecodeError::UnknownOperation(task.operation.clone()))?;

        let args = operation
            .signature()
            .bind(&task.operation, &task.positional_args, &task.named_args)?;

        Ok(Invocation {
            operation: operation.clone(),
            args,
        })
    }
}
