//! The runtime instance: program, registries, globals and the native
//! function table (spec §4 "Evaluator", §6 "Native function contract").

use crate::ast::Program;
use crate::eval::frame::Environment;
use crate::exception::{ErrorHandler, LoggingErrorHandler, PHPException};
use crate::heap::function::{NativeFunction, UserFunction};
use crate::memory::MemoryManager;
use crate::object::{Class, Interface, Trait};
use crate::scheduler::{ChannelRegistry, Scheduler, TaskId};
use crate::sync::{AtomicRegistry, MutexRegistry, RwLockRegistry, SharedDataRegistry};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::rc::Rc;

/// Resource ceilings enforced by the evaluator (spec §7 edge cases:
/// runaway recursion, unbounded loops under a deadline).
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_call_depth: usize,
    pub max_memory_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_call_depth: 4096,
            max_memory_bytes: 256 * 1024 * 1024,
        }
    }
}

/// A single embeddable runtime instance: one program, one set of global
/// bindings, one class/function registry. Multiple `Vm`s can exist in the
/// same process (e.g. one per HTTP request, see `ember-http`), each with
/// its own memory manager, since `crate::heap` refcounts are not atomic.
pub struct Vm {
    pub program: Rc<Program>,
    pub globals: Environment,
    pub memory: MemoryManager,
    pub limits: ResourceLimits,
    classes: FxHashMap<String, Rc<Class>>,
    interfaces: FxHashMap<String, Rc<Interface>>,
    traits: FxHashMap<String, Rc<Trait>>,
    functions: FxHashMap<String, Rc<UserFunction>>,
    natives: FxHashMap<String, NativeFunction>,
    error_handler: Box<dyn ErrorHandler>,
    /// Cooperative task scheduler backing `spawn`/`yield`/`await` (spec §4.6).
    /// One `Scheduler` per `Vm`: tasks spawned from this VM's program never
    /// cross into another `Vm`'s heap, since `crate::heap` refcounts aren't
    /// atomic.
    pub scheduler: Scheduler,
    /// Live channels, keyed by `ChannelId`, shared across a `Vm`'s tasks.
    pub channels: ChannelRegistry,
    /// Live mutexes, keyed by `MutexId`, shared across a `Vm`'s tasks.
    pub mutexes: MutexRegistry,
    /// Live read/write locks, keyed by `RwLockId`, shared across a `Vm`'s tasks.
    pub rwlocks: RwLockRegistry,
    /// Live atomic cells, keyed by `AtomicId`, shared across a `Vm`'s tasks.
    pub atomics: AtomicRegistry,
    /// Live shared-data cells, keyed by `SharedDataId`, shared across a `Vm`'s tasks.
    pub shared_data: SharedDataRegistry,
    /// The task whose turn the scheduler is currently holding, as observed
    /// from this thread. `None` on the embedder's own thread, outside any
    /// spawned task. Set by whoever resumes a task's body (see
    /// `ember_runtime::context`) right after `Scheduler::spawn`/`yield_now`/
    /// `block_current` hands back control, since only one task's thread
    /// ever touches a `Vm` at a time (spec §5 "Shared resources").
    pub current_task: Cell<Option<TaskId>>,
}

impl Vm {
    pub fn new(program: Rc<Program>) -> Self {
        Self {
            program,
            globals: Environment::new(),
            memory: MemoryManager::new(),
            limits: ResourceLimits::default(),
            classes: FxHashMap::default(),
            interfaces: FxHashMap::default(),
            traits: FxHashMap::default(),
            functions: FxHashMap::default(),
            natives: FxHashMap::default(),
            error_handler: Box::new(LoggingErrorHandler),
            scheduler: Scheduler::new(),
            channels: ChannelRegistry::new(),
            mutexes: MutexRegistry::new(),
            rwlocks: RwLockRegistry::new(),
            atomics: AtomicRegistry::new(),
            shared_data: SharedDataRegistry::new(),
            current_task: Cell::new(None),
        }
    }

    /// The task whose turn is currently held on this thread, if any.
    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task.get()
    }

    /// Record which task's turn this thread now holds (or clear it when a
    /// task finishes and control returns to the embedder's own thread).
    pub fn set_current_task(&self, task: Option<TaskId>) {
        self.current_task.set(task);
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_error_handler(mut self, handler: Box<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn register_class(&mut self, class: Rc<Class>) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn register_interface(&mut self, iface: Rc<Interface>) {
        self.interfaces.insert(iface.name.clone(), iface);
    }

    pub fn register_trait(&mut self, t: Rc<Trait>) {
        self.traits.insert(t.name.clone(), t);
    }

    pub fn register_function(&mut self, func: Rc<UserFunction>) {
        self.functions.insert(func.name.clone(), func);
    }

    pub fn register_native(&mut self, native: NativeFunction) {
        self.natives.insert(native.name.clone(), native);
    }

    pub fn class(&self, name: &str) -> Option<Rc<Class>> {
        self.classes.get(name).cloned()
    }

    pub fn interface(&self, name: &str) -> Option<Rc<Interface>> {
        self.interfaces.get(name).cloned()
    }

    pub fn trait_(&self, name: &str) -> Option<Rc<Trait>> {
        self.traits.get(name).cloned()
    }

    pub fn function(&self, name: &str) -> Option<Rc<UserFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn native(&self, name: &str) -> Option<NativeFunction> {
        self.natives.get(name).cloned()
    }

    /// Run the program's entry node to completion, returning its value or
    /// the uncaught exception (after routing it through the installed
    /// `ErrorHandler`).
    pub fn run(&mut self) -> Result<Value, PHPException> {
        let entry = self.program.entry;
        let program = self.program.clone();
        let mut evaluator = crate::eval::Evaluator::new(self);
        let result = match entry {
            Some(node) => evaluator.eval_top_level(&program, node),
            None => Ok(Value::null()),
        };
        if let Err(exc) = &result {
            self.error_handler.handle(exc);
        }
        result
    }

    /// Invoke a registered top-level function by name. Used by embedders
    /// (an HTTP request handler, a native extension callback) that need to
    /// re-enter the evaluator outside of `run`. Uncaught exceptions are
    /// reported through the installed `ErrorHandler` just like `run` does.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, PHPException> {
        let mut evaluator = crate::eval::Evaluator::new(self);
        let result = evaluator.call_function(name, args);
        if let Err(exc) = &result {
            self.error_handler.handle(exc);
        }
        result
    }

    /// Invoke a method on an already-constructed object. See [`Vm::call`].
    pub fn call_method(&mut self, recv: Value, method: &str, args: Vec<Value>) -> Result<Value, PHPException> {
        let mut evaluator = crate::eval::Evaluator::new(self);
        let result = evaluator.call_method_external(recv, method, args);
        if let Err(exc) = &result {
            self.error_handler.handle(exc);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_vm_has_no_registered_functions() {
        let program = Rc::new(Program::new("test.phpl"));
        let vm = Vm::new(program);
        assert!(vm.function("main").is_none());
    }

    #[test]
    fn registered_class_is_retrievable_by_name() {
        let program = Rc::new(Program::new("test.phpl"));
        let mut vm = Vm::new(program);
        let class = Rc::new(crate::object::ClassBuilder::new("Foo").build().unwrap());
        vm.register_class(class);
        assert!(vm.class("Foo").is_some());
        assert!(vm.class("Bar").is_none());
    }
}
