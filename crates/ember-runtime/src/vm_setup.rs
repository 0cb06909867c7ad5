//! VM creation and configuration.

use std::rc::Rc;

use ember_core::ast::Program;
use ember_core::memory::MemoryManager;
use ember_core::scheduler::Scheduler;
use ember_core::vm::Vm;

use crate::bind;
use crate::config::RuntimeOptions;

/// Create a fully-configured VM with stdlib support, sized per `options`.
pub fn create_vm(program: Rc<Program>, options: &RuntimeOptions) -> Vm {
    let mut vm = Vm::new(program).with_limits(options.resource_limits());
    vm.memory = MemoryManager::with_limits(options.memory_limits());
    vm.scheduler = Scheduler::with_limits(options.scheduler_limits());
    bind::bind_stdlib(&mut vm);
    vm
}
