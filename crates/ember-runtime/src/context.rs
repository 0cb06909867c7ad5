//! [`VmContext`]: the concrete [`ember_sdk::NativeContext`] every bound
//! native function sees, backed by a live `ember_core::Vm`.
//!
//! `NativeContext`'s methods all take `&self` — a native handler has no way
//! to know whether another handler further up the call stack is already
//! holding a `&mut Vm` — so this wraps the VM reference in a `RefCell` and
//! borrows it mutably only for the duration of each method body. Since
//! exactly one task's thread ever runs interpreter code at a time (the
//! scheduler's turn-based handoff, see `ember_core::scheduler::runtime`),
//! there is never a concurrent borrow to conflict with; the `RefCell` exists
//! to satisfy the trait's shape, not to arbitrate real contention.

use std::cell::RefCell;

use ember_core::heap::array::{ArrayKey, EmberArray};
use ember_core::heap::string::EmberString;
use ember_core::object::Object;
use ember_core::value::HeapTag;
use ember_core::vm::Vm;
use ember_core::Value;
use ember_sdk::error::{AbiResult, NativeError};
use ember_sdk::{NativeContext, NativeValue};

/// Stand-in task identity for mutex/channel operations made from the
/// embedder's own thread, outside any spawned task. `TaskId::new()` hands
/// out a fresh id on every call, so using it as the fallback here would
/// give every such call a distinct identity — breaking ownership checks
/// across a lock/unlock pair, or a send/receive pair, made back-to-back
/// from the same (task-less) caller. `0` is never issued by `TaskId::new()`
/// (which starts counting at 1), so it can't collide with a real task.
const SYNCHRONOUS_CALLER: ember_core::TaskId = ember_core::TaskId::from_u64(0);

/// Wraps a live `&mut Vm` so it can back a `&dyn NativeContext`.
pub struct VmContext<'a> {
    vm: RefCell<&'a mut Vm>,
}

impl<'a> VmContext<'a> {
    /// Borrow `vm` for the lifetime of one or more native calls.
    pub fn new(vm: &'a mut Vm) -> Self {
        Self { vm: RefCell::new(vm) }
    }

    fn with_vm<R>(&self, f: impl FnOnce(&mut Vm) -> R) -> R {
        let mut guard = self.vm.borrow_mut();
        f(&mut **guard)
    }

    fn object_of(val: NativeValue) -> AbiResult<&'static Object> {
        let addr = val.to_value().as_addr_of(HeapTag::Object).ok_or_else(|| NativeError::TypeMismatch {
            expected: "object".to_string(),
            got: val.type_name().to_string(),
        })?;
        Ok(unsafe { ember_core::heap::deref::<Object>(addr) })
    }

    fn string_of(val: NativeValue) -> AbiResult<&'static EmberString> {
        let addr = val.to_value().as_addr_of(HeapTag::String).ok_or_else(|| NativeError::TypeMismatch {
            expected: "string".to_string(),
            got: val.type_name().to_string(),
        })?;
        Ok(unsafe { ember_core::heap::deref::<EmberString>(addr) })
    }

    fn array_of(val: NativeValue) -> AbiResult<&'static EmberArray> {
        let addr = val.to_value().as_addr_of(HeapTag::Array).ok_or_else(|| NativeError::TypeMismatch {
            expected: "array".to_string(),
            got: val.type_name().to_string(),
        })?;
        Ok(unsafe { ember_core::heap::deref::<EmberArray>(addr) })
    }

    fn array_of_mut(val: NativeValue) -> AbiResult<&'static mut EmberArray> {
        let addr = val.to_value().as_addr_of(HeapTag::Array).ok_or_else(|| NativeError::TypeMismatch {
            expected: "array".to_string(),
            got: val.type_name().to_string(),
        })?;
        Ok(unsafe { ember_core::heap::deref_mut::<EmberArray>(addr) })
    }

    /// Run `work` off the current thread, suspending the calling task (if
    /// any) until it finishes. Called by `ember_runtime::bind` to service
    /// `IoRequest::BlockingWork` (spec §4.6 "IO thread pool").
    ///
    /// A helper thread runs `work`, sends its result back over a channel,
    /// then wakes the suspended task; by the time `block_current` returns
    /// the result is already sitting in the channel, so the final `recv`
    /// never actually waits. Calls made from the embedder's own thread
    /// (no current task to suspend) just run `work` inline instead.
    pub(crate) fn run_blocking(
        &self,
        work: Box<dyn FnOnce() -> ember_sdk::IoCompletion + Send>,
    ) -> ember_sdk::IoCompletion {
        let current = self.with_vm(|vm| vm.current_task());
        let Some(task) = current else {
            return work();
        };
        let scheduler = self.with_vm(|vm| vm.scheduler.clone());
        let (tx, rx) = std::sync::mpsc::channel();
        let wake_scheduler = scheduler.clone();
        std::thread::spawn(move || {
            let result = work();
            let _ = tx.send(result);
            wake_scheduler.wake(task);
        });
        scheduler.block_current(task);
        rx.recv().unwrap_or(ember_sdk::IoCompletion::Error("blocking work thread died".to_string()))
    }
}

impl<'a> NativeContext for VmContext<'a> {
    fn create_string(&self, s: &str) -> NativeValue {
        self.with_vm(|vm| {
            let v = ember_core::heap::alloc_string(EmberString::from_str(s));
            vm.memory.register(v);
            NativeValue::from(v)
        })
    }

    fn create_bytes(&self, data: &[u8]) -> NativeValue {
        use ember_core::heap::string::Encoding;
        self.with_vm(|vm| {
            let v = ember_core::heap::alloc_string(EmberString::new(data.to_vec(), Encoding::Binary));
            vm.memory.register(v);
            NativeValue::from(v)
        })
    }

    fn create_array(&self, items: &[NativeValue]) -> NativeValue {
        let mut arr = EmberArray::new();
        for item in items {
            let v = item.to_value();
            ember_core::heap::retain(v);
            arr.push(v);
        }
        self.with_vm(|vm| {
            let v = ember_core::heap::alloc_array(arr);
            vm.memory.register(v);
            NativeValue::from(v)
        })
    }

    fn create_object(&self, class_name: &str) -> AbiResult<NativeValue> {
        self.with_vm(|vm| {
            let class = vm
                .class(class_name)
                .ok_or_else(|| NativeError::ArgumentError(format!("class \"{class_name}\" not found")))?;
            if class.is_abstract {
                return Err(NativeError::ArgumentError(format!("cannot instantiate abstract class {class_name}")));
            }
            let has_ctor = class.resolve_method("__construct").is_some();
            let value = ember_core::heap::alloc_object(Object::new(class));
            vm.memory.register(value);
            if has_ctor {
                ember_core::heap::retain(value);
                vm.call_method(value, "__construct", Vec::new())
                    .map_err(|exc| NativeError::ArgumentError(exc.value.message()))?;
            }
            Ok(NativeValue::from(value))
        })
    }

    fn create_mutex(&self) -> NativeValue {
        self.with_vm(|vm| {
            let id = vm.mutexes.create();
            let v = ember_core::heap::alloc_resource(ember_core::heap::resource::Resource::new("Mutex", id, |_| {}));
            vm.memory.register(v);
            NativeValue::from(v)
        })
    }

    fn create_channel(&self, capacity: usize) -> NativeValue {
        self.with_vm(|vm| {
            let id = vm.channels.create(capacity.max(1));
            let v =
                ember_core::heap::alloc_resource(ember_core::heap::resource::Resource::new("Channel", id, |_| {}));
            vm.memory.register(v);
            NativeValue::from(v)
        })
    }

    fn create_rwlock(&self) -> NativeValue {
        self.with_vm(|vm| {
            let id = vm.rwlocks.create();
            let v = ember_core::heap::alloc_resource(ember_core::heap::resource::Resource::new("RwLock", id, |_| {}));
            vm.memory.register(v);
            NativeValue::from(v)
        })
    }

    fn create_atomic(&self, initial: i64) -> NativeValue {
        self.with_vm(|vm| {
            let id = vm.atomics.create(initial);
            let v = ember_core::heap::alloc_resource(ember_core::heap::resource::Resource::new("Atomic", id, |_| {}));
            vm.memory.register(v);
            NativeValue::from(v)
        })
    }

    fn create_shared_data(&self, initial: NativeValue) -> NativeValue {
        self.with_vm(|vm| {
            let v = initial.to_value();
            ember_core::heap::retain(v);
            let id = vm.shared_data.create(v);
            let r =
                ember_core::heap::alloc_resource(ember_core::heap::resource::Resource::new("SharedData", id, |_| {}));
            vm.memory.register(r);
            NativeValue::from(r)
        })
    }

    fn read_string(&self, val: NativeValue) -> AbiResult<String> {
        Ok(Self::string_of(val)?.to_string_lossy().into_owned())
    }

    fn read_bytes(&self, val: NativeValue) -> AbiResult<Vec<u8>> {
        Ok(Self::string_of(val)?.as_bytes().to_vec())
    }

    fn array_len(&self, val: NativeValue) -> AbiResult<usize> {
        Ok(Self::array_of(val)?.len())
    }

    fn array_get(&self, val: NativeValue, index: usize) -> AbiResult<NativeValue> {
        let arr = Self::array_of(val)?;
        let v = arr
            .get(&ArrayKey::Int(index as i64))
            .ok_or_else(|| NativeError::ArgumentError(format!("no element at index {index}")))?;
        ember_core::heap::retain(v);
        Ok(NativeValue::from(v))
    }

    fn array_push(&self, val: NativeValue, item: NativeValue) -> AbiResult<()> {
        let arr = Self::array_of_mut(val)?;
        let v = item.to_value();
        ember_core::heap::retain(v);
        arr.push(v);
        Ok(())
    }

    fn object_get(&self, val: NativeValue, property: &str) -> AbiResult<NativeValue> {
        let obj = Self::object_of(val)?;
        let v = obj
            .get(property)
            .ok_or_else(|| NativeError::ArgumentError(format!("undefined property ${property}")))?;
        Ok(NativeValue::from(v))
    }

    fn object_set(&self, val: NativeValue, property: &str, value: NativeValue) -> AbiResult<()> {
        let obj = Self::object_of(val)?;
        let v = value.to_value();
        ember_core::heap::retain(v);
        if let Some(old) = obj.set(property, v) {
            ember_core::heap::release(old);
        }
        Ok(())
    }

    fn object_class_name(&self, val: NativeValue) -> AbiResult<String> {
        Ok(Self::object_of(val)?.class.name.clone())
    }

    fn class_exists(&self, name: &str) -> bool {
        self.with_vm(|vm| vm.class(name).is_some())
    }

    fn instance_of(&self, val: NativeValue, class_name: &str) -> bool {
        let Ok(obj) = Self::object_of(val) else { return false };
        if let Some(other) = self.with_vm(|vm| vm.class(class_name)) {
            return obj.class.is_subclass_of(&other);
        }
        obj.class.implements(class_name)
    }

    fn current_task_id(&self) -> u64 {
        self.with_vm(|vm| vm.current_task().map(|t| t.as_u64()).unwrap_or(0))
    }

    fn spawn_function(&self, name: &str, args: &[NativeValue]) -> AbiResult<u64> {
        self.with_vm(|vm| {
            if vm.function(name).is_none() && vm.native(name).is_none() {
                return Err(NativeError::ArgumentError(format!("call to undefined function {name}()")));
            }
            for arg in args {
                ember_core::heap::retain(arg.to_value());
            }
            let id = crate::task::spawn_call(vm, name, args.iter().map(|a| a.to_value()).collect());
            Ok(id.as_u64())
        })
    }

    fn await_task(&self, task_id: u64) -> AbiResult<NativeValue> {
        self.with_vm(|vm| {
            let waiting = vm.current_task().ok_or_else(|| {
                NativeError::ArgumentError("await_task called outside a spawned task".to_string())
            })?;
            let target = ember_core::TaskId::from_u64(task_id);
            match vm.scheduler.join(waiting, target) {
                Some(v) => Ok(NativeValue::from(v)),
                None => Err(NativeError::ArgumentError(format!("task {task_id} failed or does not exist"))),
            }
        })
    }

    fn task_is_done(&self, task_id: u64) -> bool {
        self.with_vm(|vm| {
            matches!(
                vm.scheduler.task_state(ember_core::TaskId::from_u64(task_id)),
                Some(ember_core::TaskState::Completed) | Some(ember_core::TaskState::Failed)
            )
        })
    }

    fn task_cancel(&self, task_id: u64) {
        self.with_vm(|vm| vm.scheduler.request_cancel(ember_core::TaskId::from_u64(task_id)));
    }

    fn call_function(&self, name: &str, args: &[NativeValue]) -> AbiResult<NativeValue> {
        self.with_vm(|vm| {
            let values: Vec<Value> = args.iter().map(|a| a.to_value()).collect();
            for v in &values {
                ember_core::heap::retain(*v);
            }
            vm.call(name, values).map(NativeValue::from).map_err(|exc| NativeError::ArgumentError(exc.value.message()))
        })
    }

    fn call_method(&self, receiver: NativeValue, method_name: &str, args: &[NativeValue]) -> AbiResult<NativeValue> {
        self.with_vm(|vm| {
            let recv = receiver.to_value();
            ember_core::heap::retain(recv);
            let values: Vec<Value> = args.iter().map(|a| a.to_value()).collect();
            for v in &values {
                ember_core::heap::retain(*v);
            }
            vm.call_method(recv, method_name, values)
                .map(NativeValue::from)
                .map_err(|exc| NativeError::ArgumentError(exc.value.message()))
        })
    }

    fn mutex_lock(&self, mutex: NativeValue) -> AbiResult<()> {
        self.with_vm(|vm| {
            let id = mutex_id_of(mutex)?;
            let m = vm.mutexes.get(id).ok_or_else(|| NativeError::ArgumentError("mutex does not exist".to_string()))?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            if m.is_locked_by(task) {
                return Err(NativeError::ArgumentError("mutex already locked by the current task".to_string()));
            }
            loop {
                // `unlock()` can hand ownership straight to this task while it
                // was parked; check that before retrying `try_lock`, whose
                // reentrant-lock guard would otherwise mistake the handoff for
                // this task trying to lock a mutex it already holds.
                if m.is_locked_by(task) {
                    return Ok(());
                }
                match m.try_lock(task) {
                    Ok(()) => return Ok(()),
                    Err(_) => match vm.current_task() {
                        Some(_) => vm.scheduler.block_current(task),
                        None => return Err(NativeError::ArgumentError("mutex is locked".to_string())),
                    },
                }
            }
        })
    }

    fn mutex_try_lock(&self, mutex: NativeValue) -> bool {
        self.with_vm(|vm| {
            let Ok(id) = mutex_id_of(mutex) else { return false };
            let Some(m) = vm.mutexes.get(id) else { return false };
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            !m.is_locked_by(task) && m.try_lock(task).is_ok()
        })
    }

    fn mutex_unlock(&self, mutex: NativeValue) -> AbiResult<()> {
        self.with_vm(|vm| {
            let id = mutex_id_of(mutex)?;
            let m = vm.mutexes.get(id).ok_or_else(|| NativeError::ArgumentError("mutex does not exist".to_string()))?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            match m.unlock(task) {
                Ok(Some(next)) => {
                    vm.scheduler.wake(next);
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => Err(NativeError::ArgumentError(e.to_string())),
            }
        })
    }

    fn mutex_is_locked(&self, mutex: NativeValue) -> bool {
        self.with_vm(|vm| {
            let Ok(id) = mutex_id_of(mutex) else { return false };
            vm.mutexes.get(id).map(|m| m.is_locked()).unwrap_or(false)
        })
    }

    fn channel_send(&self, channel: NativeValue, value: NativeValue) -> AbiResult<bool> {
        self.with_vm(|vm| {
            let id = channel_id_of(channel)?;
            let chan = vm
                .channels
                .get(id)
                .ok_or_else(|| NativeError::ArgumentError("channel does not exist".to_string()))?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            loop {
                match chan.try_send(task, value.to_value()) {
                    Ok(ember_core::scheduler::SendOutcome::Sent { wake }) => {
                        if let Some(w) = wake {
                            vm.scheduler.wake(w);
                        }
                        return Ok(true);
                    }
                    Ok(ember_core::scheduler::SendOutcome::Blocked) => match vm.current_task() {
                        Some(_) => vm.scheduler.block_current(task),
                        None => return Ok(false),
                    },
                    Err(ember_core::scheduler::ChannelError::Closed(_)) => return Ok(false),
                }
            }
        })
    }

    fn channel_receive(&self, channel: NativeValue) -> AbiResult<Option<NativeValue>> {
        self.with_vm(|vm| {
            let id = channel_id_of(channel)?;
            let chan = vm
                .channels
                .get(id)
                .ok_or_else(|| NativeError::ArgumentError("channel does not exist".to_string()))?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            loop {
                match chan.try_recv(task) {
                    ember_core::scheduler::RecvOutcome::Received { value, wake } => {
                        if let Some(w) = wake {
                            vm.scheduler.wake(w);
                        }
                        return Ok(Some(NativeValue::from(value)));
                    }
                    ember_core::scheduler::RecvOutcome::Closed => return Ok(None),
                    ember_core::scheduler::RecvOutcome::Blocked => match vm.current_task() {
                        Some(_) => vm.scheduler.block_current(task),
                        None => return Ok(None),
                    },
                }
            }
        })
    }

    fn channel_try_receive(&self, channel: NativeValue) -> Option<NativeValue> {
        self.with_vm(|vm| {
            let id = channel_id_of(channel).ok()?;
            let chan = vm.channels.get(id)?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            match chan.try_recv(task) {
                ember_core::scheduler::RecvOutcome::Received { value, wake } => {
                    if let Some(w) = wake {
                        vm.scheduler.wake(w);
                    }
                    Some(NativeValue::from(value))
                }
                _ => None,
            }
        })
    }

    fn channel_try_send(&self, channel: NativeValue, value: NativeValue) -> bool {
        self.with_vm(|vm| {
            let Ok(id) = channel_id_of(channel) else { return false };
            let Some(chan) = vm.channels.get(id) else { return false };
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            match chan.try_send(task, value.to_value()) {
                Ok(ember_core::scheduler::SendOutcome::Sent { wake }) => {
                    if let Some(w) = wake {
                        vm.scheduler.wake(w);
                    }
                    true
                }
                _ => false,
            }
        })
    }

    fn channel_close(&self, channel: NativeValue) {
        self.with_vm(|vm| {
            if let Ok(id) = channel_id_of(channel) {
                if let Some(chan) = vm.channels.get(id) {
                    for waiter in chan.close() {
                        vm.scheduler.wake(waiter);
                    }
                }
            }
        });
    }

    fn channel_is_closed(&self, channel: NativeValue) -> bool {
        self.with_vm(|vm| {
            let Ok(id) = channel_id_of(channel) else { return true };
            vm.channels.get(id).map(|c| c.is_closed()).unwrap_or(true)
        })
    }

    fn rwlock_read(&self, lock: NativeValue) -> AbiResult<()> {
        self.with_vm(|vm| {
            let id = rwlock_id_of(lock)?;
            let rw = vm.rwlocks.get(id).ok_or_else(|| NativeError::ArgumentError("rwlock does not exist".to_string()))?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            loop {
                match rw.try_read(task) {
                    Ok(()) => return Ok(()),
                    Err(_) => match vm.current_task() {
                        Some(_) => vm.scheduler.block_current(task),
                        None => return Err(NativeError::ArgumentError("rwlock is write-locked".to_string())),
                    },
                }
            }
        })
    }

    fn rwlock_try_read(&self, lock: NativeValue) -> bool {
        self.with_vm(|vm| {
            let Ok(id) = rwlock_id_of(lock) else { return false };
            let Some(rw) = vm.rwlocks.get(id) else { return false };
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            rw.try_read(task).is_ok()
        })
    }

    fn rwlock_unlock_read(&self, lock: NativeValue) -> AbiResult<()> {
        self.with_vm(|vm| {
            let id = rwlock_id_of(lock)?;
            let rw = vm.rwlocks.get(id).ok_or_else(|| NativeError::ArgumentError("rwlock does not exist".to_string()))?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            match rw.unlock_read(task) {
                Ok(woken) => {
                    for w in woken {
                        vm.scheduler.wake(w);
                    }
                    Ok(())
                }
                Err(e) => Err(NativeError::ArgumentError(e.to_string())),
            }
        })
    }

    fn rwlock_write(&self, lock: NativeValue) -> AbiResult<()> {
        self.with_vm(|vm| {
            let id = rwlock_id_of(lock)?;
            let rw = vm.rwlocks.get(id).ok_or_else(|| NativeError::ArgumentError("rwlock does not exist".to_string()))?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            loop {
                // `unlock_write`'s `admit_next` can hand the write lock
                // straight to this task while it was parked; check that
                // before retrying `try_write`, whose own-writer guard would
                // otherwise mistake the handoff for a reentrant write lock
                // attempt and park the task a second time with nothing left
                // to wake it.
                if rw.is_write_locked_by(task) {
                    return Ok(());
                }
                match rw.try_write(task) {
                    Ok(()) => return Ok(()),
                    Err(_) => match vm.current_task() {
                        Some(_) => vm.scheduler.block_current(task),
                        None => return Err(NativeError::ArgumentError("rwlock is locked".to_string())),
                    },
                }
            }
        })
    }

    fn rwlock_try_write(&self, lock: NativeValue) -> bool {
        self.with_vm(|vm| {
            let Ok(id) = rwlock_id_of(lock) else { return false };
            let Some(rw) = vm.rwlocks.get(id) else { return false };
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            rw.try_write(task).is_ok()
        })
    }

    fn rwlock_unlock_write(&self, lock: NativeValue) -> AbiResult<()> {
        self.with_vm(|vm| {
            let id = rwlock_id_of(lock)?;
            let rw = vm.rwlocks.get(id).ok_or_else(|| NativeError::ArgumentError("rwlock does not exist".to_string()))?;
            let task = vm.current_task().unwrap_or(SYNCHRONOUS_CALLER);
            match rw.unlock_write(task) {
                Ok(woken) => {
                    for w in woken {
                        vm.scheduler.wake(w);
                    }
                    Ok(())
                }
                Err(e) => Err(NativeError::ArgumentError(e.to_string())),
            }
        })
    }

    fn rwlock_is_write_locked(&self, lock: NativeValue) -> bool {
        self.with_vm(|vm| {
            let Ok(id) = rwlock_id_of(lock) else { return false };
            vm.rwlocks.get(id).map(|rw| rw.is_write_locked()).unwrap_or(false)
        })
    }

    fn atomic_load(&self, atomic: NativeValue) -> AbiResult<i64> {
        self.with_vm(|vm| {
            let id = atomic_id_of(atomic)?;
            let cell =
                vm.atomics.get(id).ok_or_else(|| NativeError::ArgumentError("atomic does not exist".to_string()))?;
            Ok(cell.load())
        })
    }

    fn atomic_store(&self, atomic: NativeValue, value: i64) -> AbiResult<()> {
        self.with_vm(|vm| {
            let id = atomic_id_of(atomic)?;
            let cell =
                vm.atomics.get(id).ok_or_else(|| NativeError::ArgumentError("atomic does not exist".to_string()))?;
            cell.store(value);
            Ok(())
        })
    }

    fn atomic_compare_exchange(&self, atomic: NativeValue, expected: i64, new: i64) -> AbiResult<bool> {
        self.with_vm(|vm| {
            let id = atomic_id_of(atomic)?;
            let cell =
                vm.atomics.get(id).ok_or_else(|| NativeError::ArgumentError("atomic does not exist".to_string()))?;
            Ok(cell.compare_exchange(expected, new))
        })
    }

    fn atomic_fetch_add(&self, atomic: NativeValue, delta: i64) -> AbiResult<i64> {
        self.with_vm(|vm| {
            let id = atomic_id_of(atomic)?;
            let cell =
                vm.atomics.get(id).ok_or_else(|| NativeError::ArgumentError("atomic does not exist".to_string()))?;
            Ok(cell.fetch_add(delta))
        })
    }

    fn shared_data_get(&self, cell: NativeValue) -> AbiResult<NativeValue> {
        self.with_vm(|vm| {
            let id = shared_data_id_of(cell)?;
            let data = vm
                .shared_data
                .get(id)
                .ok_or_else(|| NativeError::ArgumentError("shared data does not exist".to_string()))?;
            let v = data.get();
            ember_core::heap::retain(v);
            Ok(NativeValue::from(v))
        })
    }

    fn shared_data_set(&self, cell: NativeValue, value: NativeValue) -> AbiResult<()> {
        self.with_vm(|vm| {
            let id = shared_data_id_of(cell)?;
            let data = vm
                .shared_data
                .get(id)
                .ok_or_else(|| NativeError::ArgumentError("shared data does not exist".to_string()))?;
            let v = value.to_value();
            ember_core::heap::retain(v);
            let old = data.set(v);
            ember_core::heap::release(old);
            Ok(())
        })
    }
}

/// Mutexes are represented as resource values wrapping a `MutexId`; see
/// `ember_core::heap::resource::Resource`.
fn mutex_id_of(val: NativeValue) -> AbiResult<ember_core::MutexId> {
    let addr = val.to_value().as_addr_of(HeapTag::Resource).ok_or_else(|| NativeError::TypeMismatch {
        expected: "mutex resource".to_string(),
        got: val.type_name().to_string(),
    })?;
    let resource = unsafe { ember_core::heap::deref::<ember_core::heap::resource::Resource>(addr) };
    resource
        .downcast_ref::<ember_core::MutexId>()
        .copied()
        .ok_or_else(|| NativeError::TypeMismatch { expected: "mutex resource".to_string(), got: "resource".to_string() })
}

/// Channels are represented as resource values wrapping a `ChannelId`; see
/// `ember_core::heap::resource::Resource`.
fn channel_id_of(val: NativeValue) -> AbiResult<ember_core::ChannelId> {
    let addr = val.to_value().as_addr_of(HeapTag::Resource).ok_or_else(|| NativeError::TypeMismatch {
        expected: "channel resource".to_string(),
        got: val.type_name().to_string(),
    })?;
    let resource = unsafe { ember_core::heap::deref::<ember_core::heap::resource::Resource>(addr) };
    resource
        .downcast_ref::<ember_core::ChannelId>()
        .copied()
        .ok_or_else(|| NativeError::TypeMismatch { expected: "channel resource".to_string(), got: "resource".to_string() })
}

/// RwLocks are represented as resource values wrapping an `RwLockId`; see
/// `ember_core::heap::resource::Resource`.
fn rwlock_id_of(val: NativeValue) -> AbiResult<ember_core::RwLockId> {
    let addr = val.to_value().as_addr_of(HeapTag::Resource).ok_or_else(|| NativeError::TypeMismatch {
        expected: "rwlock resource".to_string(),
        got: val.type_name().to_string(),
    })?;
    let resource = unsafe { ember_core::heap::deref::<ember_core::heap::resource::Resource>(addr) };
    resource
        .downcast_ref::<ember_core::RwLockId>()
        .copied()
        .ok_or_else(|| NativeError::TypeMismatch { expected: "rwlock resource".to_string(), got: "resource".to_string() })
}

/// Atomic cells are represented as resource values wrapping an `AtomicId`;
/// see `ember_core::heap::resource::Resource`.
fn atomic_id_of(val: NativeValue) -> AbiResult<ember_core::AtomicId> {
    let addr = val.to_value().as_addr_of(HeapTag::Resource).ok_or_else(|| NativeError::TypeMismatch {
        expected: "atomic resource".to_string(),
        got: val.type_name().to_string(),
    })?;
    let resource = unsafe { ember_core::heap::deref::<ember_core::heap::resource::Resource>(addr) };
    resource
        .downcast_ref::<ember_core::AtomicId>()
        .copied()
        .ok_or_else(|| NativeError::TypeMismatch { expected: "atomic resource".to_string(), got: "resource".to_string() })
}

/// SharedData cells are represented as resource values wrapping a
/// `SharedDataId`; see `ember_core::heap::resource::Resource`.
fn shared_data_id_of(val: NativeValue) -> AbiResult<ember_core::SharedDataId> {
    let addr = val.to_value().as_addr_of(HeapTag::Resource).ok_or_else(|| NativeError::TypeMismatch {
        expected: "shared data resource".to_string(),
        got: val.type_name().to_string(),
    })?;
    let resource = unsafe { ember_core::heap::deref::<ember_core::heap::resource::Resource>(addr) };
    resource.downcast_ref::<ember_core::SharedDataId>().copied().ok_or_else(|| NativeError::TypeMismatch {
        expected: "shared data resource".to_string(),
        got: "resource".to_string(),
    })
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
    fn create_and_read_string_round_trips() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let v = ctx.create_string("hello");
        assert_eq!(ctx.read_string(v).unwrap(), "hello");
    }

    #[test]
    fn create_array_and_read_elements() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let items = [NativeValue::i32(1), NativeValue::i32(2)];
        let arr = ctx.create_array(&items);
        assert_eq!(ctx.array_len(arr).unwrap(), 2);
        assert_eq!(ctx.array_get(arr, 0).unwrap().as_i32(), Some(1));
    }

    #[test]
    fn create_object_on_missing_class_errors() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        assert!(ctx.create_object("Nope").is_err());
    }

    #[test]
    fn class_exists_reflects_registry() {
        let mut vm = fresh_vm();
        let class = Rc::new(ember_core::object::ClassBuilder::new("Foo").build().unwrap());
        vm.register_class(class);
        let ctx = VmContext::new(&mut vm);
        assert!(ctx.class_exists("Foo"));
        assert!(!ctx.class_exists("Bar"));
    }

    #[test]
    fn current_task_id_is_zero_outside_any_task() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        assert_eq!(ctx.current_task_id(), 0);
    }

    #[test]
    fn mutex_lock_blocks_a_second_would_be_owner_until_unlocked() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let mutex = ctx.create_mutex();
        assert!(!ctx.mutex_is_locked(mutex));
        assert!(ctx.mutex_try_lock(mutex));
        assert!(ctx.mutex_is_locked(mutex));
        assert!(!ctx.mutex_try_lock(mutex));
        ctx.mutex_unlock(mutex).unwrap();
        assert!(!ctx.mutex_is_locked(mutex));
    }

    #[test]
    fn mutex_lock_from_outside_a_task_with_no_contention_succeeds_immediately() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let mutex = ctx.create_mutex();
        ctx.mutex_lock(mutex).unwrap();
        assert!(ctx.mutex_is_locked(mutex));
    }

    #[test]
    fn channel_send_then_receive_round_trips_a_value() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let channel = ctx.create_channel(4);
        assert!(ctx.channel_send(channel, NativeValue::i32(42)).unwrap());
        assert_eq!(ctx.channel_receive(channel).unwrap().and_then(|v| v.as_i32()), Some(42));
    }

    #[test]
    fn closed_empty_channel_receive_returns_none() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let channel = ctx.create_channel(1);
        ctx.channel_close(channel);
        assert!(ctx.channel_receive(channel).unwrap().is_none());
    }

    #[test]
    fn rwlock_allows_concurrent_reads_but_excludes_a_writer() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let lock = ctx.create_rwlock();
        assert!(ctx.rwlock_try_read(lock));
        assert!(!ctx.rwlock_is_write_locked(lock));
        assert!(!ctx.rwlock_try_write(lock));
        ctx.rwlock_unlock_read(lock).unwrap();
        assert!(ctx.rwlock_try_write(lock));
        assert!(ctx.rwlock_is_write_locked(lock));
        assert!(!ctx.rwlock_try_read(lock));
        ctx.rwlock_unlock_write(lock).unwrap();
        assert!(!ctx.rwlock_is_write_locked(lock));
    }

    #[test]
    fn rwlock_write_from_outside_a_task_with_no_contention_succeeds_immediately() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let lock = ctx.create_rwlock();
        ctx.rwlock_write(lock).unwrap();
        assert!(ctx.rwlock_is_write_locked(lock));
    }

    #[test]
    fn atomic_load_store_and_compare_exchange_round_trip() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let atomic = ctx.create_atomic(10);
        assert_eq!(ctx.atomic_load(atomic).unwrap(), 10);
        ctx.atomic_store(atomic, 20).unwrap();
        assert_eq!(ctx.atomic_load(atomic).unwrap(), 20);
        assert!(!ctx.atomic_compare_exchange(atomic, 5, 99).unwrap());
        assert!(ctx.atomic_compare_exchange(atomic, 20, 99).unwrap());
        assert_eq!(ctx.atomic_load(atomic).unwrap(), 99);
        assert_eq!(ctx.atomic_fetch_add(atomic, 1).unwrap(), 99);
        assert_eq!(ctx.atomic_load(atomic).unwrap(), 100);
    }

    #[test]
    fn shared_data_get_set_round_trips_and_releases_the_old_value() {
        let mut vm = fresh_vm();
        let ctx = VmContext::new(&mut vm);
        let cell = ctx.create_shared_data(NativeValue::i32(1));
        assert_eq!(ctx.shared_data_get(cell).unwrap().as_i32(), Some(1));
        ctx.shared_data_set(cell, NativeValue::i32(2)).unwrap();
        assert_eq!(ctx.shared_data_get(cell).unwrap().as_i32(), Some(2));
    }
}
