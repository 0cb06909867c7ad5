//! `NativeHandler` — stdlib dispatch interface, and the symbolic function
//! registry native modules populate at load time.

use crate::context::NativeContext;
use crate::value::NativeValue;

// ============================================================================
// IO Request / Completion types (for event loop integration)
// ============================================================================

/// IO request submitted by a native handler that needs to suspend.
///
/// When a native handler cannot complete synchronously (e.g. a channel
/// receive with nothing buffered, or work that belongs on a blocking thread
/// pool rather than the cooperative scheduler's own threads), it returns
/// `NativeCallResult::Suspend(IoRequest)`. The embedder's event loop
/// processes the request and resumes the task when it is done.
pub enum IoRequest {
    /// Run blocking work on an IO thread pool (filesystem ops, process
    /// exec, a timed sleep). The closure runs off the scheduler's own
    /// threads and returns an `IoCompletion`.
    BlockingWork {
        /// Work to execute on the IO thread pool.
        work: Box<dyn FnOnce() -> IoCompletion + Send>,
    },
    /// Non-blocking channel receive — yield until a value is available or
    /// the channel closes.
    ChannelReceive {
        /// The channel value to receive from.
        channel: NativeValue,
    },
    /// Non-blocking channel send — yield until buffer space is available
    /// or the channel closes.
    ChannelSend {
        /// The channel value to send to.
        channel: NativeValue,
        /// The value to send.
        value: NativeValue,
    },
}

/// Result of a completed IO operation from a pool thread.
///
/// Pool threads don't have access to the GC, so they return raw data; the
/// event loop converts these to GC-allocated values when resuming the task.
pub enum IoCompletion {
    /// Raw bytes — the event loop allocates as a binary-safe string.
    Bytes(Vec<u8>),
    /// Raw string — the event loop allocates as a UTF-8 string.
    String(String),
    /// Primitive value (int, float, bool, null) — no allocation needed.
    Primitive(NativeValue),
    /// Error — the event loop raises this as the task's exception.
    Error(String),
}

// ============================================================================
// NativeCallResult
// ============================================================================

/// Result of a native call handler.
pub enum NativeCallResult {
    /// Call handled successfully, returned a value.
    Value(NativeValue),
    /// This handler does not recognize the call.
    Unhandled,
    /// Call failed with an error.
    Error(String),
    /// Handler cannot complete synchronously — submit an IO request and
    /// suspend the task. The event loop processes the request and resumes
    /// the task when done.
    Suspend(IoRequest),
}

impl NativeCallResult {
    /// A successful result with a null value.
    #[inline]
    pub fn null() -> Self {
        Self::Value(NativeValue::null())
    }

    /// A successful result with an i32 value.
    #[inline]
    pub fn i32(val: i32) -> Self {
        Self::Value(NativeValue::i32(val))
    }

    /// A successful result with an f64 value.
    #[inline]
    pub fn f64(val: f64) -> Self {
        Self::Value(NativeValue::f64(val))
    }

    /// A successful result with a bool value.
    #[inline]
    pub fn bool(val: bool) -> Self {
        Self::Value(NativeValue::bool(val))
    }
}

/// Handles native calls dispatched by symbolic id from a fixed-ID-range
/// module. Most native modules instead register into a
/// [`NativeFunctionRegistry`] by name; this trait exists for modules that
/// prefer a dense numeric dispatch table.
pub trait NativeHandler: Send + Sync {
    /// Handle a native call.
    ///
    /// - `ctx`: VM context (GC, class registry, scheduler access).
    /// - `id`: the native call id.
    /// - `args`: call arguments.
    ///
    /// Returns `NativeCallResult::Unhandled` if `id` is not recognized.
    fn call(&self, ctx: &dyn NativeContext, id: u16, args: &[NativeValue]) -> NativeCallResult;
}

/// A handler that returns `Unhandled` for every call.
pub struct NoopNativeHandler;

impl NativeHandler for NoopNativeHandler {
    fn call(&self, _ctx: &dyn NativeContext, _id: u16, _args: &[NativeValue]) -> NativeCallResult {
        NativeCallResult::Unhandled
    }
}

// ============================================================================
// Native Function Registry (name-based dispatch)
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

/// A native function handler, for symbolic name-based dispatch.
pub type NativeHandlerFn = Arc<dyn Fn(&dyn NativeContext, &[NativeValue]) -> NativeCallResult + Send + Sync>;

/// Registry of native functions indexed by symbolic name.
///
/// Used at module load time to resolve symbolic native call names to
/// handler functions. Stdlib modules register their handlers here (e.g.
/// `"math.abs"`, `"logger.info"`).
pub struct NativeFunctionRegistry {
    handlers: HashMap<String, NativeHandlerFn>,
}

impl NativeFunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Register a native function by name.
    pub fn register(
        &mut self,
        name: &str,
        handler: impl Fn(&dyn NativeContext, &[NativeValue]) -> NativeCallResult + Send + Sync + 'static,
    ) {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<NativeHandlerFn> {
        self.handlers.get(name).cloned()
    }

    /// Whether a handler is registered under this name.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for NativeFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
