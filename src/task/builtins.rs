//! Built-in operations
//!
//! The default table every worker starts with:
//!
//! | Operation   | Signature            | Result                                   |
//! |-------------|----------------------|------------------------------------------|
//! | `add`       | `(a, b)`             | `a + b`                                  |
//! | `subtract`  | `(a, b)`             | `a - b`                                  |
//! | `divide`    | `(a, b)`             | `a / b`, fails on a zero divisor         |
//! | `echo`      | `(value)`            | `value` unchanged                        |
//! | `concat`    | `(parts, sep="")`    | string parts joined with `sep`           |
//! | `len`       | `(value)`            | length of a string, array or object      |
//! | `sleep`     | `(ms)`               | `ms`, after blocking for that long       |
//! | `node_info` | `()`                 | worker node id and version               |
//!
//! Integer arithmetic stays integral and is overflow-checked. When either
//! operand is a float, arithmetic is done in `f64`.

use super::registry::{type_name, Operation, OperationRegistry, Param, Signature};
use super::OperationError;
use crate::Result;
use serde_json::{json, Number, Value};
use std::time::Duration;

/// Upper bound for `sleep`, keeps a single task from pinning a blocking thread forever
pub const MAX_SLEEP_MS: u64 = 10 * 60 * 1000;

/// Build the default registry for a worker
pub fn builtin_registry(node_id: &str) -> Result<OperationRegistry> {
    let mut registry = OperationRegistry::new();
    let binary = || Signature::new(vec![Param::required("a"), Param::required("b")]);

    registry.register(Operation::new("add", binary(), |args| {
        arithmetic("add", args.number("a")?, args.number("b")?, i64::checked_add, |a, b| a + b)
    }))?;

    registry.register(Operation::new("subtract", binary(), |args| {
        arithmetic("subtract", args.number("a")?, args.number("b")?, i64::checked_sub, |a, b| a - b)
    }))?;

    registry.register(Operation::new("divide", binary(), |args| {
        divide(args.number("a")?, args.number("b")?)
    }))?;

    registry.register(Operation::new(
        "echo",
        Signature::new(vec![Param::required("value")]),
        |args| Ok(args.get("value")?.clone()),
    ))?;

    registry.register(Operation::new(
        "concat",
        Signature::new(vec![Param::required("parts"), Param::optional("sep", "")]),
        |args| {
            let sep = args.str("sep")?;
            let parts = args
                .array("parts")?
                .iter()
                .map(|part| match part {
                    Value::String(s) => Ok(s.as_str()),
                    other => Err(OperationError::InvalidArgument {
                        name: "parts".to_string(),
                        expected: "an array of strings",
                        actual: format!("an array containing {}", type_name(other)),
                    }),
                })
                .collect::<std::result::Result<Vec<&str>, _>>()?;
            Ok(Value::String(parts.join(sep)))
        },
    ))?;

    registry.register(Operation::new(
        "len",
        Signature::new(vec![Param::required("value")]),
        |args| {
            let len = match args.get("value")? {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(OperationError::InvalidArgument {
                        name: "value".to_string(),
                        expected: "a string, array or object",
                        actual: type_name(other).to_string(),
                    })
                }
            };
            Ok(json!(len))
        },
    ))?;

    registry.register(Operation::new(
        "sleep",
        Signature::new(vec![Param::required("ms")]),
        |args| {
            let ms = args.u64("ms")?;
            if ms > MAX_SLEEP_MS {
                return Err(OperationError::Failed(format!(
                    "sleep of {}ms exceeds limit of {}ms",
                    ms, MAX_SLEEP_MS
                )));
            }
            std::thread::sleep(Duration::from_millis(ms));
            Ok(json!(ms))
        },
    ))?;

    let node_id = node_id.to_string();
    registry.register(Operation::new("node_info", Signature::default(), move |_| {
        Ok(json!({
            "node_id": node_id,
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }))?;

    Ok(registry)
}

fn arithmetic(
    name: &'static str,
    a: &Number,
    b: &Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> std::result::Result<Value, OperationError> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return int_op(a, b)
            .map(Value::from)
            .ok_or(OperationError::Overflow(name));
    }
    float_result(name, float_op(as_f64(a), as_f64(b)))
}

fn divide(a: &Number, b: &Number) -> std::result::Result<Value, OperationError> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if b == 0 {
            return Err(OperationError::DivisionByZero);
        }
        // Exact quotients stay integral; i64::MIN / -1 falls through to f64
        if let Some(0) = a.checked_rem(b) {
            if let Some(q) = a.checked_div(b) {
                return Ok(Value::from(q));
            }
        }
    }
    let divisor = as_f64(b);
    if divisor == 0.0 {
        return Err(OperationError::DivisionByZero);
    }
    float_result("divide", as_f64(a) / divisor)
}

fn as_f64(n: &Number) -> f64 {
    // Every serde_json number converts without arbitrary_precision
    n.as_f64().unwrap_or(f64::NAN)
}

fn float_result(name: &'static str, value: f64) -> std::result::Result<Value, OperationError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| OperationError::Failed(format!("{} produced a non-finite result", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{DecodeError, TaskDescriptor};

    fn run(task: TaskDescriptor) -> std::result::Result<Value, String> {
        let registry = builtin_registry("test-node").unwrap();
        let invocation = registry.resolve(&task).map_err(|e| e.to_string())?;
        invocation.run().map_err(|e| e.to_string())
    }

    #[test]
    fn test_add_integers() {
        assert_eq!(run(TaskDescriptor::new("add").arg(5).arg(3)), Ok(json!(8)));
        assert_eq!(run(TaskDescriptor::new("add").arg(10).arg(20)), Ok(json!(30)));
        assert_eq!(run(TaskDescriptor::new("add").arg(-4).arg(1)), Ok(json!(-3)));
    }

    #[test]
    fn test_add_floats() {
        assert_eq!(run(TaskDescriptor::new("add").arg(1.5).arg(2)), Ok(json!(3.5)));
    }

    #[test]
    fn test_add_named() {
        let task = TaskDescriptor::new("add").named("a", 2).named("b", 40);
        assert_eq!(run(task), Ok(json!(42)));
    }

    #[test]
    fn test_add_overflow() {
        let result = run(TaskDescriptor::new("add").arg(i64::MAX).arg(1));
        assert_eq!(result, Err("integer overflow in add".to_string()));
    }

    #[test]
    fn test_add_rejects_strings() {
        let result = run(TaskDescriptor::new("add").arg("5").arg(3));
        assert_eq!(result, Err("argument 'a' must be a number, got a string".to_string()));
    }

    #[test]
    fn test_subtract() {
        assert_eq!(run(TaskDescriptor::new("subtract").arg(5).arg(8)), Ok(json!(-3)));
    }

    #[test]
    fn test_divide() {
        assert_eq!(run(TaskDescriptor::new("divide").arg(6).arg(3)), Ok(json!(2)));
        assert_eq!(run(TaskDescriptor::new("divide").arg(1).arg(2)), Ok(json!(0.5)));
        assert_eq!(run(TaskDescriptor::new("divide").arg(i64::MIN).arg(-1)), Ok(json!(9.223372036854776e18)));
    }

    #[test]
    fn test_divide_by_zero() {
        assert_eq!(
            run(TaskDescriptor::new("divide").arg(1).arg(0)),
            Err("division by zero".to_string())
        );
        assert_eq!(
            run(TaskDescriptor::new("divide").arg(1.0).arg(0.0)),
            Err("division by zero".to_string())
        );
    }

    #[test]
    fn test_concat() {
        let task = TaskDescriptor::new("concat").arg(json!(["a", "b", "c"])).named("sep", "-");
        assert_eq!(run(task), Ok(json!("a-b-c")));

        let task = TaskDescriptor::new("concat").arg(json!(["a", 1]));
        assert!(run(task).unwrap_err().contains("an array of strings"));
    }

    #[test]
    fn test_len() {
        assert_eq!(run(TaskDescriptor::new("len").arg("héllo")), Ok(json!(5)));
        assert_eq!(run(TaskDescriptor::new("len").arg(json!([1, 2, 3]))), Ok(json!(3)));
        assert!(run(TaskDescriptor::new("len").arg(7)).is_err());
    }

    #[test]
    fn test_sleep_limits() {
        assert_eq!(run(TaskDescriptor::new("sleep").arg(1)), Ok(json!(1)));
        assert!(run(TaskDescriptor::new("sleep").arg(MAX_SLEEP_MS + 1)).is_err());
        assert!(run(TaskDescriptor::new("sleep").arg(-1)).is_err());
    }

    #[test]
    fn test_node_info() {
        let value = run(TaskDescriptor::new("node_info")).unwrap();
        assert_eq!(value["node_id"], json!("test-node"));
    }

    #[test]
    fn test_multiply_is_not_registered() {
        let registry = builtin_registry("n").unwrap();
        let err = registry
            .resolve(&TaskDescriptor::new("multiply").arg(2).arg(3))
            .unwrap_err();
        assert_eq!(err, DecodeError::UnknownOperation("multiply".to_string()));
    }

    #[test]
    fn test_registry_contents() {
        let registry = builtin_registry("n").unwrap();
        assert_eq!(
            registry.names(),
            vec!["add", "concat", "divide", "echo", "len", "node_info", "sleep", "subtract"]
        );
    }
}
