//! Ergonomic, type-safe wrappers over raw [`NativeValue`]s — arrays,
//! objects, classes, functions and tasks — built entirely on top of
//! [`NativeContext`] without depending on engine internals.

use crate::context::NativeContext;
use crate::error::{AbiResult, NativeError};
use crate::value::NativeValue;

// ============================================================================
// NativeArray
// ============================================================================

/// Wrapper for an array value with typed element access.
///
/// All operations delegate through `&dyn NativeContext`.
pub struct NativeArray<'a> {
    value: NativeValue,
    ctx: &'a dyn NativeContext,
}

impl<'a> NativeArray<'a> {
    /// Wrap a `NativeValue` as an array. Errors if not a heap pointer.
    pub fn wrap(ctx: &'a dyn NativeContext, val: NativeValue) -> AbiResult<Self> {
        if !val.is_ptr() {
            return Err(NativeError::TypeMismatch {
                expected: "Array".to_string(),
                got: val.type_name().to_string(),
            });
        }
        Ok(Self { value: val, ctx })
    }

    /// Number of live entries.
    pub fn len(&self) -> AbiResult<usize> {
        self.ctx.array_len(self.value)
    }

    /// Whether the array has no live entries.
    pub fn is_empty(&self) -> AbiResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> AbiResult<NativeValue> {
        self.ctx.array_get(self.value, index)
    }

    /// Element at `index` as i32.
    pub fn get_i32(&self, index: usize) -> AbiResult<i32> {
        self.get(index)?.as_i32().ok_or_else(|| NativeError::TypeMismatch {
            expected: "i32".to_string(),
            got: "other".to_string(),
        })
    }

    /// Element at `index` as f64.
    pub fn get_f64(&self, index: usize) -> AbiResult<f64> {
        self.get(index)?.as_f64().ok_or_else(|| NativeError::TypeMismatch {
            expected: "f64".to_string(),
            got: "other".to_string(),
        })
    }

    /// Element at `index` as bool.
    pub fn get_bool(&self, index: usize) -> AbiResult<bool> {
        self.get(index)?.as_bool().ok_or_else(|| NativeError::TypeMismatch {
            expected: "bool".to_string(),
            got: "other".to_string(),
        })
    }

    /// Element at `index` as a string.
    pub fn get_string(&self, index: usize) -> AbiResult<String> {
        self.ctx.read_string(self.get(index)?)
    }

    /// Append `item` (`$arr[] = item` semantics).
    pub fn push(&self, item: NativeValue) -> AbiResult<()> {
        self.ctx.array_push(self.value, item)
    }

    /// Collect all elements.
    pub fn to_vec(&self) -> AbiResult<Vec<NativeValue>> {
        let len = self.len()?;
        let mut result = Vec::with_capacity(len);
        for i in 0..len {
            result.push(self.get(i)?);
        }
        Ok(result)
    }

    /// Collect all elements as i32.
    pub fn to_vec_i32(&self) -> AbiResult<Vec<i32>> {
        let len = self.len()?;
        let mut result = Vec::with_capacity(len);
        for i in 0..len {
            result.push(self.get_i32(i)?);
        }
        Ok(result)
    }

    /// Collect all elements as f64.
    pub fn to_vec_f64(&self) -> AbiResult<Vec<f64>> {
        let len = self.len()?;
        let mut result = Vec::with_capacity(len);
        for i in 0..len {
            result.push(self.get_f64(i)?);
        }
        Ok(result)
    }

    /// Collect all elements as strings.
    pub fn to_vec_string(&self) -> AbiResult<Vec<String>> {
        let len = self.len()?;
        let mut result = Vec::with_capacity(len);
        for i in 0..len {
            result.push(self.get_string(i)?);
        }
        Ok(result)
    }

    /// Unwrap to the underlying `NativeValue`.
    pub fn into_value(self) -> NativeValue {
        self.value
    }

    /// The context this wrapper was built from.
    pub fn context(&self) -> &'a dyn NativeContext {
        self.ctx
    }
}

// ============================================================================
// NativeObject
// ============================================================================

/// Wrapper for an object value with named property access.
///
/// Unlike a vtable/field-index ABI, property lookup here is the same
/// name-keyed operation the evaluator itself performs (a hidden-shape
/// offset lookup under the hood) — there is no separate schema to build or
/// cache on the SDK side.
pub struct NativeObject<'a> {
    value: NativeValue,
    ctx: &'a dyn NativeContext,
}

impl<'a> NativeObject<'a> {
    /// Wrap a `NativeValue` as an object. Errors if not a heap pointer.
    pub fn wrap(ctx: &'a dyn NativeContext, val: NativeValue) -> AbiResult<Self> {
        if !val.is_ptr() {
            return Err(NativeError::TypeMismatch {
                expected: "Object".to_string(),
                got: val.type_name().to_string(),
            });
        }
        Ok(Self { value: val, ctx })
    }

    /// Read a property by name.
    pub fn get(&self, name: &str) -> AbiResult<NativeValue> {
        self.ctx.object_get(self.value, name)
    }

    /// Read a property as i32.
    pub fn get_i32(&self, name: &str) -> AbiResult<i32> {
        self.get(name)?.as_i32().ok_or_else(|| NativeError::TypeMismatch {
            expected: "i32".to_string(),
            got: "other".to_string(),
        })
    }

    /// Read a property as f64.
    pub fn get_f64(&self, name: &str) -> AbiResult<f64> {
        self.get(name)?.as_f64().ok_or_else(|| NativeError::TypeMismatch {
            expected: "f64".to_string(),
            got: "other".to_string(),
        })
    }

    /// Read a property as bool.
    pub fn get_bool(&self, name: &str) -> AbiResult<bool> {
        self.get(name)?.as_bool().ok_or_else(|| NativeError::TypeMismatch {
            expected: "bool".to_string(),
            got: "other".to_string(),
        })
    }

    /// Read a property as a string.
    pub fn get_string(&self, name: &str) -> AbiResult<String> {
        self.ctx.read_string(self.get(name)?)
    }

    /// Write a property by name.
    pub fn set(&self, name: &str, value: NativeValue) -> AbiResult<()> {
        self.ctx.object_set(self.value, name, value)
    }

    /// Write a property as i32.
    pub fn set_i32(&self, name: &str, value: i32) -> AbiResult<()> {
        self.set(name, NativeValue::i32(value))
    }

    /// Write a property as f64.
    pub fn set_f64(&self, name: &str, value: f64) -> AbiResult<()> {
        self.set(name, NativeValue::f64(value))
    }

    /// This instance's runtime class name.
    pub fn class_name(&self) -> AbiResult<String> {
        self.ctx.object_class_name(self.value)
    }

    /// Unwrap to the underlying `NativeValue`.
    pub fn into_value(self) -> NativeValue {
        self.value
    }

    /// The context this wrapper was built from.
    pub fn context(&self) -> &'a dyn NativeContext {
        self.ctx
    }
}

// ============================================================================
// NativeClass
// ============================================================================

/// A handle to a registered class, identified by name.
#[derive(Debug, Clone)]
pub struct NativeClass {
    name: String,
}

impl NativeClass {
    /// Look up a class by name. Errors if no such class is registered.
    pub fn from_name(ctx: &dyn NativeContext, name: &str) -> AbiResult<Self> {
        if !ctx.class_exists(name) {
            return Err(NativeError::AbiError(format!("class '{name}' is not registered")));
        }
        Ok(Self { name: name.to_string() })
    }

    /// The class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allocate a new instance of this class, running its constructor (if
    /// any) with no arguments.
    pub fn instantiate(&self, ctx: &dyn NativeContext) -> AbiResult<NativeValue> {
        ctx.create_object(&self.name)
    }

    /// Whether `val` is an instance of this class (or a subclass, or an
    /// implementor if this names an interface).
    pub fn instance_of(&self, ctx: &dyn NativeContext, val: NativeValue) -> bool {
        ctx.instance_of(val, &self.name)
    }
}

// ============================================================================
// NativeFunction
// ============================================================================

/// A handle to a top-level function, identified by name.
pub struct NativeFunction<'a> {
    name: String,
    ctx: &'a dyn NativeContext,
}

impl<'a> NativeFunction<'a> {
    /// Wrap a function name.
    pub fn new(ctx: &'a dyn NativeContext, name: impl Into<String>) -> Self {
        Self { name: name.into(), ctx }
    }

    /// The function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call this function synchronously (blocks until complete).
    pub fn call(&self, args: &[NativeValue]) -> AbiResult<NativeValue> {
        self.ctx.call_function(&self.name, args)
    }

    /// Spawn this function as a task and return a handle to it.
    pub fn call_async(&self, args: &[NativeValue]) -> AbiResult<NativeTask<'a>> {
        let task_id = self.ctx.spawn_function(&self.name, args)?;
        Ok(NativeTask { task_id, ctx: self.ctx })
    }
}

// ============================================================================
// NativeMethod
// ============================================================================

/// A handle to a method on a given receiver, identified by name.
pub struct NativeMethod {
    /// Method name.
    pub method_name: String,
}

impl NativeMethod {
    /// Name a method to call later against a receiver.
    pub fn named(method_name: impl Into<String>) -> Self {
        Self { method_name: method_name.into() }
    }

    /// Call this method on `receiver` (synchronous).
    pub fn call(&self, ctx: &dyn NativeContext, receiver: NativeValue, args: &[NativeValue]) -> AbiResult<NativeValue> {
        ctx.call_method(receiver, &self.method_name, args)
    }
}

// ============================================================================
// NativeTask
// ============================================================================

/// Handle for an async task with await/cancel capabilities.
pub struct NativeTask<'a> {
    task_id: u64,
    ctx: &'a dyn NativeContext,
}

impl<'a> NativeTask<'a> {
    /// Build a handle from an already-known task id.
    pub fn new(ctx: &'a dyn NativeContext, task_id: u64) -> Self {
        Self { task_id, ctx }
    }

    /// The task id.
    pub fn id(&self) -> u64 {
        self.task_id
    }

    /// Non-blocking check for whether the task has finished.
    pub fn is_done(&self) -> bool {
        self.ctx.task_is_done(self.task_id)
    }

    /// Block until the task completes and return its result.
    pub fn await_result(&self) -> AbiResult<NativeValue> {
        self.ctx.await_task(self.task_id)
    }

    /// Request cancellation of the task.
    pub fn cancel(&self) {
        self.ctx.task_cancel(self.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NativeCallResult;
    use std::cell::RefCell;

    /// A minimal in-memory `NativeContext` fake, just enough to exercise
    /// the wrapper types without a real VM.
    #[derive(Default)]
    struct FakeContext {
        classes: Vec<&'static str>,
        objects: RefCell<Vec<(String, f64)>>,
    }

    impl NativeContext for FakeContext {
        fn create_string(&self, _s: &str) -> NativeValue {
            NativeValue::null()
        }
        fn create_bytes(&self, _data: &[u8]) -> NativeValue {
            NativeValue::null()
        }
        fn create_array(&self, _items: &[NativeValue]) -> NativeValue {
            NativeValue::i32(1)
        }
        fn create_mutex(&self) -> NativeValue {
            NativeValue::i32(0)
        }
        fn create_channel(&self, _capacity: usize) -> NativeValue {
            NativeValue::i32(0)
        }
        fn create_rwlock(&self) -> NativeValue {
            NativeValue::i32(0)
        }
        fn create_atomic(&self, _initial: i64) -> NativeValue {
            NativeValue::i32(0)
        }
        fn create_shared_data(&self, initial: NativeValue) -> NativeValue {
            initial
        }
        fn create_object(&self, class_name: &str) -> AbiResult<NativeValue> {
            if self.classes.contains(&class_name) {
                self.objects.borrow_mut().push((class_name.to_string(), 0.0));
                Ok(NativeValue::i32((self.objects.borrow().len() - 1) as i32))
            } else {
                Err(NativeError::AbiError("no such class".to_string()))
            }
        }
        fn read_string(&self, _val: NativeValue) -> AbiResult<String> {
            Ok(String::new())
        }
        fn read_bytes(&self, _val: NativeValue) -> AbiResult<Vec<u8>> {
            Ok(Vec::new())
        }
        fn array_len(&self, _val: NativeValue) -> AbiResult<usize> {
            Ok(0)
        }
        fn array_get(&self, _val: NativeValue, _index: usize) -> AbiResult<NativeValue> {
            Err(NativeError::AbiError("empty".to_string()))
        }
        fn array_push(&self, _val: NativeValue, _item: NativeValue) -> AbiResult<()> {
            Ok(())
        }
        fn object_get(&self, val: NativeValue, name: &str) -> AbiResult<NativeValue> {
            let idx = val.as_i32().unwrap_or(-1);
            if name == "x" && idx >= 0 {
                Ok(NativeValue::f64(self.objects.borrow()[idx as usize].1))
            } else {
                Err(NativeError::AbiError("no such field".to_string()))
            }
        }
        fn object_set(&self, val: NativeValue, name: &str, value: NativeValue) -> AbiResult<()> {
            let idx = val.as_i32().unwrap_or(-1);
            if name == "x" && idx >= 0 {
                self.objects.borrow_mut()[idx as usize].1 = value.as_f64().unwrap_or(0.0);
                Ok(())
            } else {
                Err(NativeError::AbiError("no such field".to_string()))
            }
        }
        fn object_class_name(&self, val: NativeValue) -> AbiResult<String> {
            let idx = val.as_i32().unwrap_or(-1);
            Ok(self.objects.borrow()[idx as usize].0.clone())
        }
        fn class_exists(&self, name: &str) -> bool {
            self.classes.contains(&name)
        }
        fn instance_of(&self, _val: NativeValue, _class_name: &str) -> bool {
            false
        }
        fn current_task_id(&self) -> u64 {
            0
        }
        fn spawn_function(&self, _name: &str, _args: &[NativeValue]) -> AbiResult<u64> {
            Ok(1)
        }
        fn await_task(&self, _task_id: u64) -> AbiResult<NativeValue> {
            Ok(NativeValue::null())
        }
        fn task_is_done(&self, _task_id: u64) -> bool {
            true
        }
        fn task_cancel(&self, _task_id: u64) {}
        fn call_function(&self, _name: &str, _args: &[NativeValue]) -> AbiResult<NativeValue> {
            Ok(NativeValue::null())
        }
        fn call_method(&self, _receiver: NativeValue, _method_name: &str, _args: &[NativeValue]) -> AbiResult<NativeValue> {
            Ok(NativeValue::null())
        }
        fn channel_send(&self, _channel: NativeValue, _value: NativeValue) -> AbiResult<bool> {
            Ok(true)
        }
        fn channel_receive(&self, _channel: NativeValue) -> AbiResult<Option<NativeValue>> {
            Ok(None)
        }
        fn channel_try_receive(&self, _channel: NativeValue) -> Option<NativeValue> {
            None
        }
        fn channel_try_send(&self, _channel: NativeValue, _value: NativeValue) -> bool {
            true
        }
        fn channel_close(&self, _channel: NativeValue) {}
        fn channel_is_closed(&self, _channel: NativeValue) -> bool {
            false
        }
        fn mutex_lock(&self, _mutex: NativeValue) -> AbiResult<()> {
            Ok(())
        }
        fn mutex_try_lock(&self, _mutex: NativeValue) -> bool {
            true
        }
        fn mutex_unlock(&self, _mutex: NativeValue) -> AbiResult<()> {
            Ok(())
        }
        fn mutex_is_locked(&self, _mutex: NativeValue) -> bool {
            false
        }
        fn rwlock_read(&self, _lock: NativeValue) -> AbiResult<()> {
            Ok(())
        }
        fn rwlock_try_read(&self, _lock: NativeValue) -> bool {
            true
        }
        fn rwlock_unlock_read(&self, _lock: NativeValue) -> AbiResult<()> {
            Ok(())
        }
        fn rwlock_write(&self, _lock: NativeValue) -> AbiResult<()> {
            Ok(())
        }
        fn rwlock_try_write(&self, _lock: NativeValue) -> bool {
            true
        }
        fn rwlock_unlock_write(&self, _lock: NativeValue) -> AbiResult<()> {
            Ok(())
        }
        fn rwlock_is_write_locked(&self, _lock: NativeValue) -> bool {
            false
        }
        fn atomic_load(&self, _atomic: NativeValue) -> AbiResult<i64> {
            Ok(0)
        }
        fn atomic_store(&self, _atomic: NativeValue, _value: i64) -> AbiResult<()> {
            Ok(())
        }
        fn atomic_compare_exchange(&self, _atomic: NativeValue, _expected: i64, _new: i64) -> AbiResult<bool> {
            Ok(true)
        }
        fn atomic_fetch_add(&self, _atomic: NativeValue, _delta: i64) -> AbiResult<i64> {
            Ok(0)
        }
        fn shared_data_get(&self, _cell: NativeValue) -> AbiResult<NativeValue> {
            Ok(NativeValue::null())
        }
        fn shared_data_set(&self, _cell: NativeValue, _value: NativeValue) -> AbiResult<()> {
            Ok(())
        }
    }

    #[test]
    fn native_class_instantiate_and_field_roundtrip() {
        let ctx = FakeContext { classes: vec!["Point"], ..Default::default() };
        let class = NativeClass::from_name(&ctx, "Point").unwrap();
        let instance = class.instantiate(&ctx).unwrap();
        let obj = NativeObject::wrap(&ctx, instance).unwrap();
        obj.set_f64("x", 3.5).unwrap();
        assert_eq!(obj.get_f64("x").unwrap(), 3.5);
        assert_eq!(obj.class_name().unwrap(), "Point");
    }

    #[test]
    fn native_class_from_name_errors_when_unregistered() {
        let ctx = FakeContext::default();
        assert!(NativeClass::from_name(&ctx, "Missing").is_err());
    }

    #[test]
    fn native_function_call_delegates_to_context() {
        let ctx = FakeContext::default();
        let func = NativeFunction::new(&ctx, "greet");
        let result = func.call(&[]).unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn unused_call_result_helper_compiles() {
        let _ = NativeCallResult::null();
    }
}
