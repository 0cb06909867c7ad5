//! Ember VM Core Runtime
//!
//! This crate provides the embeddable runtime for a PHP-like dynamic
//! language: a NaN-boxed value representation, a reference-counted heap
//! with a generational tracing collector on top, a hidden-shape object
//! model with inline caches, a tree-walking evaluator with call frames and
//! exception propagation, and a cooperative concurrency substrate.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod ast;
pub mod eval;
pub mod exception;
pub mod gc;
pub mod heap;
pub mod memory;
pub mod object;
pub mod scheduler;
pub mod sync;
pub mod value;
pub mod vm;

pub use ast::{BinaryOp, Literal, Node, NodeIndex, Program, SourceMap, UnaryOp};
pub use eval::{Binding, CallFrame, CallStack, EvalResult, Environment, Evaluator, Signal, StackOverflow};
pub use exception::{ErrorHandler, ErrorKind, ExceptionValue, LoggingErrorHandler, PHPException, TraceFrame};
pub use gc::{GcDecision, GcPolicyEngine, GcStats, GenerationalCollector, MemoryUsage, RootSet};
pub use memory::MemoryManager;
pub use object::{Class, ClassBuilder, Closure, InlineCache, Interface, Method, Object, Shape, ShapeId, StructInstance, Trait};
pub use scheduler::{Channel, ChannelId, ChannelRegistry, Scheduler, Task, TaskId, TaskState};
pub use sync::{
    AtomicCell, AtomicId, AtomicRegistry, Mutex, MutexGuard, MutexId, MutexRegistry, RwLock, RwLockId, RwLockRegistry,
    SharedData, SharedDataId, SharedDataRegistry,
};
pub use value::{HeapTag, Value};
pub use vm::{ResourceLimits, Vm};

/// VM execution errors surfaced outside the exception/`Result<Value, PHPException>`
/// path — resource ceilings and embedder misuse, not user-level PHP errors.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// The call stack exceeded its configured maximum depth.
    #[error("stack overflow")]
    StackOverflow,

    /// A value was accessed where the evaluator expected a different type.
    #[error("type error: {0}")]
    TypeError(String),

    /// Any other runtime error not covered by a more specific variant.
    #[error("runtime error: {0}")]
    RuntimeError(String),
}

/// VM execution result for [`VmError`]-level failures.
pub type VmResult<T> = Result<T, VmError>;
