//! User-defined and native function payloads (spec §3, §4.4, §6).

use std::rc::Rc;

use crate::ast::NodeIndex;
use crate::exception::ExceptionValue;
use crate::value::Value;
use crate::vm::Vm;

/// A single declared parameter.
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name, used for by-name binding in `call_user_function`.
    pub name: String,
    /// Default-value expression, evaluated lazily at call time if the
    /// argument is omitted.
    pub default: Option<NodeIndex>,
    /// Whether this is the trailing variadic parameter (`...$rest`).
    pub variadic: bool,
}

/// An AST-backed function: the interpreter's primary unit of dispatch.
///
/// Closures and arrow functions (`crate::object::closure::Closure`) wrap a
/// `UserFunction` plus captured variables; a bare top-level `function` or
/// method is a `UserFunction` with no enclosing closure.
#[derive(Debug, Clone)]
pub struct UserFunction {
    /// Declared name (empty for anonymous closures).
    pub name: String,
    /// Source file, used for stack traces.
    pub file: String,
    /// Declared parameters, in order.
    pub params: Vec<Param>,
    /// Root expression/statement-list node of the function body.
    pub body: NodeIndex,
}

impl UserFunction {
    /// Minimum number of positional arguments required (params without a
    /// default and not variadic).
    pub fn min_args(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| p.default.is_none() && !p.variadic)
            .count()
    }

    /// Maximum number of positional arguments accepted, or `None` if the
    /// function is variadic (unbounded).
    pub fn max_args(&self) -> Option<usize> {
        if self.params.iter().any(|p| p.variadic) {
            None
        } else {
            Some(self.params.len())
        }
    }
}

/// Signature every native (Rust-implemented) function must have (spec §6):
/// `Fn(&mut VM, &[Value]) -> Result<Value, Error>`.
///
/// Boxed as `Rc<dyn Fn>` rather than a bare `fn` pointer so that a native
/// function can close over state — the name a registry entry was filed
/// under, a handler ID, bridged closures from `ember-sdk`'s
/// [`ember_sdk::NativeFunctionRegistry`](../../ember_sdk/struct.NativeFunctionRegistry.html)
/// entries included. `Rc`, not `Arc`: native functions live on the same
/// single-threaded heap as every other boxed value.
pub type NativeFn = Rc<dyn Fn(&mut Vm, &[Value]) -> Result<Value, ExceptionValue>>;

/// A native function registered by the standard library (spec §4.4, §6).
#[derive(Clone)]
pub struct NativeFunction {
    /// Registered name, as seen from source (`strlen`, `array_map`, …).
    pub name: String,
    /// Minimum accepted argument count.
    pub min_args: usize,
    /// Maximum accepted argument count (`None` = variadic).
    pub max_args: Option<usize>,
    /// The Rust implementation.
    pub func: NativeFn,
}

impl NativeFunction {
    /// Wrap a plain closure as a `NativeFunction`, the common case for both
    /// hand-written builtins and bridged SDK registry entries.
    pub fn new(
        name: impl Into<String>,
        min_args: usize,
        max_args: Option<usize>,
        func: impl Fn(&mut Vm, &[Value]) -> Result<Value, ExceptionValue> + 'static,
    ) -> Self {
        Self { name: name.into(), min_args, max_args, func: Rc::new(func) }
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).finish()
    }
}
