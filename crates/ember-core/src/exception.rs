//! Exceptions and error propagation (spec §7).

use crate::value::Value;

/// The taxonomy of errors the evaluator itself can raise (as opposed to
/// a user `throw` of an arbitrary object), spec §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    UndefinedVariable(String),
    UndefinedFunction(String),
    UndefinedClass(String),
    UndefinedMethod { class: String, method: String },
    UndefinedProperty { class: String, property: String },
    TypeError(String),
    DivisionByZero,
    ReadonlyPropertyModification { class: String, property: String },
    AbstractInstantiation(String),
    CancelledOperation,
    OutOfMemory,
}

impl ErrorKind {
    pub fn message(&self) -> String {
        match self {
            ErrorKind::UndefinedVariable(name) => format!("undefined variable ${name}"),
            ErrorKind::UndefinedFunction(name) => format!("call to undefined function {name}()"),
            ErrorKind::UndefinedClass(name) => format!("class \"{name}\" not found"),
            ErrorKind::UndefinedMethod { class, method } => {
                format!("call to undefined method {class}::{method}()")
            }
            ErrorKind::UndefinedProperty { class, property } => {
                format!("undefined property {class}::${property}")
            }
            ErrorKind::TypeError(msg) => msg.clone(),
            ErrorKind::DivisionByZero => "division by zero".to_string(),
            ErrorKind::ReadonlyPropertyModification { class, property } => {
                format!("cannot modify readonly property {class}::${property}")
            }
            ErrorKind::AbstractInstantiation(name) => {
                format!("cannot instantiate abstract class {name}")
            }
            ErrorKind::CancelledOperation => "operation cancelled".to_string(),
            ErrorKind::OutOfMemory => "out of memory".to_string(),
        }
    }
}

/// A single stack-trace entry, captured as the exception unwinds through
/// `crate::eval::Evaluator` call frames.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

/// The value actually propagated by `Result::Err` inside the evaluator:
/// either a runtime-detected [`ErrorKind`] or a user-thrown `Value`
/// (normally an `Object` instance of some `Exception` subclass).
#[derive(Debug, Clone)]
pub enum ExceptionValue {
    Runtime(ErrorKind),
    Thrown(Value),
}

impl ExceptionValue {
    pub fn message(&self) -> String {
        match self {
            ExceptionValue::Runtime(kind) => kind.message(),
            ExceptionValue::Thrown(_) => "uncaught exception".to_string(),
        }
    }
}

/// A fully-formed exception: the triggering value plus an accumulated
/// stack trace, handed to `crate::exception::ErrorHandler` when it
/// escapes every `catch` clause.
#[derive(Debug, Clone)]
pub struct PHPException {
    pub value: ExceptionValue,
    pub trace: Vec<TraceFrame>,
}

impl PHPException {
    pub fn new(value: ExceptionValue) -> Self {
        Self { value, trace: Vec::new() }
    }

    pub fn with_frame(mut self, frame: TraceFrame) -> Self {
        self.trace.push(frame);
        self
    }

    pub fn push_frame(&mut self, frame: TraceFrame) {
        self.trace.push(frame);
    }
}

/// Installed on a `crate::vm::Vm` to decide what happens to an exception
/// that unwinds past the outermost call frame — analogous to PHP's
/// `set_exception_handler`.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, exception: &PHPException);
}

/// The default handler: logs via `tracing` and otherwise swallows the
/// exception (the caller, e.g. an HTTP request handler, decides whether
/// this ends the request with a 500).
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&self, exception: &PHPException) {
        tracing::error!(
            message = %exception.value.message(),
            frames = exception.trace.len(),
            "uncaught exception"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_messages_are_descriptive() {
        let k = ErrorKind::UndefinedVariable("x".to_string());
        assert_eq!(k.message(), "undefined variable $x");
    }

    #[test]
    fn trace_frames_accumulate_in_order() {
        let exc = PHPException::new(ExceptionValue::Runtime(ErrorKind::DivisionByZero))
            .with_frame(TraceFrame { function: "inner".to_string(), file: "a.phpl".to_string(), line: 3 })
            .with_frame(TraceFrame { function: "outer".to_string(), file: "a.phpl".to_string(), line: 10 });
        assert_eq!(exc.trace.len(), 2);
        assert_eq!(exc.trace[0].function, "inner");
    }
}
