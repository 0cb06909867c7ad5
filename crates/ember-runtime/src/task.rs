//! Bridges `Scheduler::spawn`'s `Send + 'static` closures to a `Vm`, whose
//! `Rc`-based heap is not itself thread-safe.
//!
//! Safe despite the raw pointer: the scheduler only ever hands its single
//! cooperative "turn" to one task's OS thread at a time (see
//! `ember_core::scheduler::runtime`), so `ptr` is never dereferenced from
//! two threads concurrently even though several threads exist for the
//! lifetime of the spawned task. The pointee outlives every task spawned
//! from it because an embedder only drops its `Vm` after every task it
//! spawned has been joined or the process is exiting.

use ember_core::value::Value;
use ember_core::vm::Vm;

struct SendVmPtr(*mut Vm);
unsafe impl Send for SendVmPtr {}

/// Spawn a task that, once scheduled, calls the named top-level function
/// with `args` against the same `Vm` the caller is already running in.
pub fn spawn_call(vm: &mut Vm, name: &str, args: Vec<Value>) -> ember_core::TaskId {
    let ptr = SendVmPtr(vm as *mut Vm);
    let name = name.to_string();
    let parent = vm.current_task();
    vm.scheduler.spawn(parent, move |_scheduler, task_id| {
        let ptr = ptr;
        let vm = unsafe { &mut *ptr.0 };
        vm.set_current_task(Some(task_id));
        let result = vm.call(&name, args).unwrap_or(Value::null());
        vm.set_current_task(parent);
        result
    })
}
