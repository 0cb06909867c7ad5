//! `NativeContext` — abstract VM operations for native modules.
//!
//! Defines the interface the engine implements. Native modules (including
//! the standard library) program against this trait without depending on
//! engine internals: a handler can be unit-tested against a fake context
//! with no VM running at all.

use crate::error::AbiResult;
use crate::value::NativeValue;

/// Abstract VM context for native handlers.
///
/// This trait is the single entry point for every ABI operation a native
/// function needs. The embedding engine provides the concrete
/// implementation; native modules only see this trait.
///
/// Every operation here is name-keyed (class name, property name, function
/// name) rather than id/vtable-index-keyed: the underlying object model
/// resolves a property to its shape offset and a method to its `Rc<Method>`
/// by name already, so there is no separate numeric namespace to expose.
///
/// # Performance
///
/// Dynamic dispatch (`&dyn NativeContext`) adds a couple of nanoseconds per
/// call. Negligible next to the work each method actually does (GC
/// allocation, shape lookup, scheduler operations).
pub trait NativeContext {
    // ------------------------------------------------------------------
    // Value creation
    // ------------------------------------------------------------------

    /// Allocate a new UTF-8 string on the GC heap.
    fn create_string(&self, s: &str) -> NativeValue;

    /// Allocate a new binary-safe (not necessarily UTF-8) string on the GC
    /// heap. Used for request/response bodies and other byte-oriented data.
    fn create_bytes(&self, data: &[u8]) -> NativeValue;

    /// Allocate a new array on the GC heap, populated with `items` in order.
    fn create_array(&self, items: &[NativeValue]) -> NativeValue;

    /// Allocate a new instance of the named class, running its constructor
    /// with no arguments if it declares one.
    fn create_object(&self, class_name: &str) -> AbiResult<NativeValue>;

    /// Allocate a new mutex, unlocked (spec "Shared resources"). Equivalent
    /// to evaluating `new Mutex()` in source.
    fn create_mutex(&self) -> NativeValue;

    /// Allocate a new bounded FIFO channel of the given capacity (clamped to
    /// at least 1). Equivalent to evaluating `new Channel($capacity)`.
    fn create_channel(&self, capacity: usize) -> NativeValue;

    /// Allocate a new read/write lock, unlocked. Equivalent to evaluating
    /// `new RwLock()`.
    fn create_rwlock(&self) -> NativeValue;

    /// Allocate a new atomic cell seeded with `initial`. Equivalent to
    /// evaluating `new Atomic($initial)`.
    fn create_atomic(&self, initial: i64) -> NativeValue;

    /// Allocate a new shared-data cell seeded with `initial`. Equivalent to
    /// evaluating `new SharedData($initial)`.
    fn create_shared_data(&self, initial: NativeValue) -> NativeValue;

    // ------------------------------------------------------------------
    // Value reading
    // ------------------------------------------------------------------

    /// Read a string value as a (lossily-decoded) Rust `String`.
    fn read_string(&self, val: NativeValue) -> AbiResult<String>;

    /// Read a string value's raw bytes, without any UTF-8 assumption.
    fn read_bytes(&self, val: NativeValue) -> AbiResult<Vec<u8>>;

    // ------------------------------------------------------------------
    // Array operations
    // ------------------------------------------------------------------

    /// Number of live entries in an array.
    fn array_len(&self, val: NativeValue) -> AbiResult<usize>;

    /// Element at integer key `index`.
    fn array_get(&self, val: NativeValue, index: usize) -> AbiResult<NativeValue>;

    /// Append `item` to the array (`$arr[] = item` semantics).
    fn array_push(&self, val: NativeValue, item: NativeValue) -> AbiResult<()>;

    // ------------------------------------------------------------------
    // Object operations
    // ------------------------------------------------------------------

    /// Read a property by name.
    fn object_get(&self, val: NativeValue, property: &str) -> AbiResult<NativeValue>;

    /// Write a property by name, transitioning the object's shape if the
    /// property is new.
    fn object_set(&self, val: NativeValue, property: &str, value: NativeValue) -> AbiResult<()>;

    /// The runtime class name of an object instance.
    fn object_class_name(&self, val: NativeValue) -> AbiResult<String>;

    // ------------------------------------------------------------------
    // Class operations
    // ------------------------------------------------------------------

    /// Whether a class with this name is registered.
    fn class_exists(&self, name: &str) -> bool;

    /// Whether `val` is an instance of `class_name` (or a subclass, or an
    /// implementor if `class_name` names an interface).
    fn instance_of(&self, val: NativeValue, class_name: &str) -> bool;

    // ------------------------------------------------------------------
    // Task operations
    // ------------------------------------------------------------------

    /// The currently running task's id, for diagnostics and correlation.
    fn current_task_id(&self) -> u64;

    /// Spawn a new task running the named top-level function with `args`.
    fn spawn_function(&self, name: &str, args: &[NativeValue]) -> AbiResult<u64>;

    /// Block the calling task until `task_id` finishes and return its result.
    fn await_task(&self, task_id: u64) -> AbiResult<NativeValue>;

    /// Non-blocking check for whether a task has finished.
    fn task_is_done(&self, task_id: u64) -> bool;

    /// Request cancellation of a task.
    fn task_cancel(&self, task_id: u64);

    // ------------------------------------------------------------------
    // Function execution
    // ------------------------------------------------------------------

    /// Call a top-level function by name (synchronous, blocks until
    /// complete).
    fn call_function(&self, name: &str, args: &[NativeValue]) -> AbiResult<NativeValue>;

    /// Call a method on an object by name (synchronous).
    fn call_method(&self, receiver: NativeValue, method_name: &str, args: &[NativeValue]) -> AbiResult<NativeValue>;

    // ------------------------------------------------------------------
    // Mutex operations
    // ------------------------------------------------------------------

    /// Lock a mutex, blocking the calling task until it is acquired.
    fn mutex_lock(&self, mutex: NativeValue) -> AbiResult<()>;

    /// Try to lock a mutex without blocking; `false` if already held.
    fn mutex_try_lock(&self, mutex: NativeValue) -> bool;

    /// Unlock a mutex previously locked by the calling task.
    fn mutex_unlock(&self, mutex: NativeValue) -> AbiResult<()>;

    /// Whether a mutex is currently held by any task.
    fn mutex_is_locked(&self, mutex: NativeValue) -> bool;

    // ------------------------------------------------------------------
    // Channel operations
    // ------------------------------------------------------------------

    /// Send a value to a channel (blocking). Returns `false` if the channel
    /// is closed.
    fn channel_send(&self, channel: NativeValue, value: NativeValue) -> AbiResult<bool>;

    /// Receive a value from a channel (blocking). Returns `None` if the
    /// channel is closed and drained.
    fn channel_receive(&self, channel: NativeValue) -> AbiResult<Option<NativeValue>>;

    /// Try to receive a value from a channel (non-blocking).
    fn channel_try_receive(&self, channel: NativeValue) -> Option<NativeValue>;

    /// Try to send a value to a channel (non-blocking).
    fn channel_try_send(&self, channel: NativeValue, value: NativeValue) -> bool;

    /// Close a channel.
    fn channel_close(&self, channel: NativeValue);

    /// Whether a channel is closed.
    fn channel_is_closed(&self, channel: NativeValue) -> bool;

    // ------------------------------------------------------------------
    // RwLock operations
    // ------------------------------------------------------------------

    /// Acquire the read lock, blocking the calling task until admitted.
    /// Multiple readers may hold the lock concurrently.
    fn rwlock_read(&self, lock: NativeValue) -> AbiResult<()>;

    /// Try to acquire the read lock without blocking; `false` if a writer
    /// currently holds (or is queued ahead of) the lock.
    fn rwlock_try_read(&self, lock: NativeValue) -> bool;

    /// Release a read lock previously acquired by the calling task.
    fn rwlock_unlock_read(&self, lock: NativeValue) -> AbiResult<()>;

    /// Acquire the write lock, blocking the calling task until admitted.
    fn rwlock_write(&self, lock: NativeValue) -> AbiResult<()>;

    /// Try to acquire the write lock without blocking; `false` if already
    /// held by a reader or writer.
    fn rwlock_try_write(&self, lock: NativeValue) -> bool;

    /// Release a write lock previously acquired by the calling task.
    fn rwlock_unlock_write(&self, lock: NativeValue) -> AbiResult<()>;

    /// Whether the lock is currently held for writing.
    fn rwlock_is_write_locked(&self, lock: NativeValue) -> bool;

    // ------------------------------------------------------------------
    // Atomic operations
    // ------------------------------------------------------------------

    /// Read the current value.
    fn atomic_load(&self, atomic: NativeValue) -> AbiResult<i64>;

    /// Overwrite the current value.
    fn atomic_store(&self, atomic: NativeValue, value: i64) -> AbiResult<()>;

    /// Atomically replace the value with `new` if it currently equals
    /// `expected`; returns whether the swap happened.
    fn atomic_compare_exchange(&self, atomic: NativeValue, expected: i64, new: i64) -> AbiResult<bool>;

    /// Atomically add `delta` to the value, returning the previous value.
    fn atomic_fetch_add(&self, atomic: NativeValue, delta: i64) -> AbiResult<i64>;

    // ------------------------------------------------------------------
    // SharedData operations
    // ------------------------------------------------------------------

    /// Read the current value under the cell's lock.
    fn shared_data_get(&self, cell: NativeValue) -> AbiResult<NativeValue>;

    /// Replace the current value under the cell's lock.
    fn shared_data_set(&self, cell: NativeValue, value: NativeValue) -> AbiResult<()>;
}
