//! Bridges `ember_sdk`'s symbolic, name-keyed native function registry into
//! a `Vm`'s own `NativeFunction` dispatch table (spec §6 "Native function
//! contract").
//!
//! `NativeFunctionRegistry` handlers take `&dyn NativeContext` and return a
//! `NativeCallResult`; `Vm::register_native` wants `NativeFn`
//! (`Fn(&mut Vm, &[Value]) -> Result<Value, ExceptionValue>`). This module
//! is the seam between the two: one [`VmContext`] per call, and a
//! `NativeCallResult` -> `Result<Value, ExceptionValue>` translation that
//! also services `NativeCallResult::Suspend` (the stdlib's `time.sleep`
//! blocking-work case) without the caller's task busy-waiting.

use ember_core::exception::{ErrorKind, ExceptionValue};
use ember_core::heap::function::NativeFunction;
use ember_core::heap::string::{EmberString, Encoding};
use ember_core::value::Value;
use ember_core::vm::Vm;
use ember_sdk::handler::{IoCompletion, IoRequest, NativeCallResult, NativeHandlerFn};
use ember_sdk::{NativeContext, NativeFunctionRegistry, NativeValue};

use crate::context::VmContext;

/// Every symbolic name `ember_stdlib::registry::register_stdlib` populates.
/// Kept here (rather than asking the registry to enumerate itself, which
/// it doesn't support) so `bind_stdlib` knows what to pull over into a
/// fresh `Vm`.
pub const STDLIB_NATIVES: &[&str] = &[
    "logger.debug",
    "logger.info",
    "logger.warn",
    "logger.error",
    "math.abs",
    "math.sign",
    "math.floor",
    "math.ceil",
    "math.round",
    "math.trunc",
    "math.min",
    "math.max",
    "math.pow",
    "math.sqrt",
    "math.sin",
    "math.cos",
    "math.tan",
    "math.asin",
    "math.acos",
    "math.atan",
    "math.atan2",
    "math.exp",
    "math.log",
    "math.log10",
    "math.random",
    "math.PI",
    "math.E",
    "time.now",
    "time.monotonic",
    "time.hrtime",
    "time.sleep",
    "time.sleepMicros",
    "sync.mutex.new",
    "sync.mutex.lock",
    "sync.mutex.tryLock",
    "sync.mutex.unlock",
    "sync.mutex.isLocked",
    "sync.channel.new",
    "sync.channel.send",
    "sync.channel.receive",
    "sync.channel.tryReceive",
    "sync.channel.trySend",
    "sync.channel.close",
    "sync.channel.isClosed",
    "sync.rwlock.new",
    "sync.rwlock.read",
    "sync.rwlock.tryRead",
    "sync.rwlock.unlockRead",
    "sync.rwlock.write",
    "sync.rwlock.tryWrite",
    "sync.rwlock.unlockWrite",
    "sync.rwlock.isWriteLocked",
    "sync.atomic.new",
    "sync.atomic.load",
    "sync.atomic.store",
    "sync.atomic.compareExchange",
    "sync.atomic.fetchAdd",
    "sync.sharedData.new",
    "sync.sharedData.get",
    "sync.sharedData.set",
    "task.spawn",
    "task.await",
    "task.isDone",
    "task.cancel",
    "task.currentId",
];

/// Build a registry with every stdlib native function and bind all of
/// `STDLIB_NATIVES` onto `vm`.
pub fn bind_stdlib(vm: &mut Vm) {
    let mut registry = NativeFunctionRegistry::new();
    ember_stdlib::register_stdlib(&mut registry);
    bind_registry(vm, &registry, STDLIB_NATIVES);
}

/// Register every name in `names` found in `registry` onto `vm`, under the
/// same symbolic name, so ordinary function-call dispatch (spec §4.7)
/// reaches it exactly like a function declared in source.
pub fn bind_registry(vm: &mut Vm, registry: &NativeFunctionRegistry, names: &[&str]) {
    for &name in names {
        if let Some(handler) = registry.get(name) {
            vm.register_native(bridge(name, handler));
        }
    }
}

fn bridge(name: &str, handler: NativeHandlerFn) -> NativeFunction {
    NativeFunction::new(name, 0, None, move |vm: &mut Vm, args: &[Value]| {
        let native_args: Vec<NativeValue> = args.iter().map(|v| NativeValue::from(*v)).collect();
        let ctx = VmContext::new(vm);
        dispatch(&ctx, name, &handler, &native_args)
    })
}

fn dispatch(
    ctx: &VmContext<'_>,
    name: &str,
    handler: &NativeHandlerFn,
    args: &[NativeValue],
) -> Result<Value, ExceptionValue> {
    match handler(ctx, args) {
        NativeCallResult::Value(v) => Ok(v.to_value()),
        NativeCallResult::Unhandled => Err(ExceptionValue::Runtime(ErrorKind::UndefinedFunction(name.to_string()))),
        NativeCallResult::Error(msg) => Err(ExceptionValue::Runtime(ErrorKind::TypeError(msg))),
        NativeCallResult::Suspend(request) => resolve_suspend(ctx, request),
    }
}

/// Carry a `Suspend`ed native call to completion. There is no separate
/// embedder event loop in this runtime (spec §4.6 folds IO suspension into
/// the same cooperative scheduler every task already yields through), so
/// resolving a suspend happens right here, on the calling task's own
/// thread, rather than being handed off to be polled later.
fn resolve_suspend(ctx: &VmContext<'_>, request: IoRequest) -> Result<Value, ExceptionValue> {
    match request {
        IoRequest::BlockingWork { work } => Ok(completion_to_value(ctx, ctx.run_blocking(work))),
        IoRequest::ChannelReceive { channel } => match ctx.channel_receive(channel) {
            Ok(Some(v)) => Ok(v.to_value()),
            Ok(None) => Ok(Value::null()),
            Err(err) => Err(ExceptionValue::Runtime(ErrorKind::TypeError(err.to_string()))),
        },
        IoRequest::ChannelSend { channel, value } => match ctx.channel_send(channel, value) {
            Ok(sent) => Ok(Value::of_bool(sent)),
            Err(err) => Err(ExceptionValue::Runtime(ErrorKind::TypeError(err.to_string()))),
        },
    }
}

fn completion_to_value(ctx: &VmContext<'_>, completion: IoCompletion) -> Value {
    match completion {
        IoCompletion::Bytes(bytes) => ctx.create_bytes(&bytes).to_value(),
        IoCompletion::String(s) => ctx.create_string(&s).to_value(),
        IoCompletion::Primitive(v) => v.to_value(),
        IoCompletion::Error(_) => Value::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::ast::Program;
    use std::rc::Rc;

    fn fresh_vm() -> Vm {
        Vm::new(Rc::new(Program::new("test.phpl")))
    }

    #[test]
    fn bound_math_function_is_callable_by_name() {
        let mut vm = fresh_vm();
        bind_stdlib(&mut vm);
        let result = vm.call("math.sqrt", vec![Value::of_float(16.0)]).unwrap();
        assert_eq!(result.as_float(), Some(4.0));
    }

    #[test]
    fn bound_logger_function_returns_null() {
        let mut vm = fresh_vm();
        bind_stdlib(&mut vm);
        let s = ember_core::heap::alloc_string(EmberString::from_str("hi"));
        ember_core::heap::retain(s);
        let result = vm.call("logger.info", vec![s]).unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn zero_duration_sleep_resolves_without_blocking() {
        let mut vm = fresh_vm();
        bind_stdlib(&mut vm);
        let result = vm.call("time.sleep", vec![Value::of_int(0)]).unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn nonzero_sleep_suspends_and_resumes_the_calling_task() {
        let mut vm = fresh_vm();
        bind_stdlib(&mut vm);
        let id = crate::task::spawn_call(&mut vm, "time.sleep", vec![Value::of_int(5)]);
        vm.scheduler.wait_idle();
        assert_eq!(vm.scheduler.task_result(id), Some(Value::null()));
    }

    #[test]
    fn unhandled_name_bridged_manually_raises_undefined_function() {
        let mut vm = fresh_vm();
        let registry = NativeFunctionRegistry::new();
        // A name present in STDLIB_NATIVES but never registered stays
        // unbound, same as a function never declared in source.
        bind_registry(&mut vm, &registry, STDLIB_NATIVES);
        assert!(vm.native("math.abs").is_none());
    }
}
