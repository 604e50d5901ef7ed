//! Callables the `fifopool` binary registers for its own workers.

use std::path::Path;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use crate::scheduler::job::JobFailure;
use crate::worker::executor::Registry;

fn invalid(message: impl Into<String>) -> JobFailure {
    JobFailure::new("InvalidArgument", message)
}

fn str_arg<'a>(args: &'a [Value], position: usize) -> Result<&'a str, JobFailure> {
    args.get(position)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("argument {position} must be a string")))
}

fn u64_arg(args: &[Value], position: usize) -> Result<u64, JobFailure> {
    args.get(position)
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid(format!("argument {position} must be a non-negative integer")))
}

pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register("one", |_| Ok(json!(1)))
        .register("echo", |args| Ok(args.first().cloned().unwrap_or(Value::Null)))
        .register("hi", |args| Ok(json!(format!("Hello {}", str_arg(args, 0)?))))
        .register("err", |_| Err(JobFailure::new("JobError", "Test Exception")))
        .register("add", |args| {
            if let (Some(a), Some(b)) = (
                args.first().and_then(Value::as_i64),
                args.get(1).and_then(Value::as_i64),
            ) {
                return Ok(json!(a + b));
            }
            match (
                args.first().and_then(Value::as_f64),
                args.get(1).and_then(Value::as_f64),
            ) {
                (Some(a), Some(b)) => Ok(json!(a + b)),
                _ => Err(invalid("add takes two numbers")),
            }
        })
        .register("sleep_ms", |args| {
            let ms = u64_arg(args, 0)?;
            thread::sleep(Duration::from_millis(ms));
            Ok(json!(ms))
        })
        .register("big_hi", |args| {
            let repeat = if args.is_empty() { 4000 } else { u64_arg(args, 0)? };
            Ok(json!("Hi".repeat(repeat as usize)))
        })
        .register("exit_once", |args| {
            // Simulates a crash: the first call that finds the marker dies.
            let marker = Path::new(str_arg(args, 0)?);
            if marker.exists() {
                let _ = std::fs::remove_file(marker);
                std::process::exit(1);
            }
            Ok(json!("Exit okay"))
        });
    registry
}
