//! Closures and arrow functions: a `UserFunction` plus captured bindings
//! (spec §3 "Closure", §4.4 "closure/arrow declarations").

use crate::heap::function::UserFunction;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// A captured variable is either copied in by value at closure-creation
/// time, or shared by reference with the enclosing frame — the latter is
/// implemented by boxing the binding's cell, so both the frame's
/// environment and the closure hold the same `Rc<RefCell<Value>>`.
#[derive(Debug, Clone)]
pub enum CapturedVar {
    ByValue(Value),
    ByRef(Rc<RefCell<Value>>),
}

impl CapturedVar {
    pub fn get(&self) -> Value {
        match self {
            CapturedVar::ByValue(v) => *v,
            CapturedVar::ByRef(cell) => *cell.borrow(),
        }
    }
}

/// A closure value: bundles a function body with the variables it
/// captured from its defining scope, and (for method closures) the bound
/// receiver and defining class used for `self`/visibility resolution.
#[derive(Debug, Clone)]
pub struct Closure {
    pub function: Rc<UserFunction>,
    pub captures: FxHashMap<String, CapturedVar>,
    pub bound_receiver: Option<Value>,
    pub is_arrow: bool,
}

impl Closure {
    pub fn new(function: Rc<UserFunction>, is_arrow: bool) -> Self {
        Self {
            function,
            captures: FxHashMap::default(),
            bound_receiver: None,
            is_arrow,
        }
    }

    pub fn capture_by_value(&mut self, name: impl Into<String>, value: Value) {
        self.captures.insert(name.into(), CapturedVar::ByValue(value));
    }

    pub fn capture_by_ref(&mut self, name: impl Into<String>, cell: Rc<RefCell<Value>>) {
        self.captures.insert(name.into(), CapturedVar::ByRef(cell));
    }
}
