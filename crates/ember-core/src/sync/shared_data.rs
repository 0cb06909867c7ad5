//! Atomically-refcounted shared cell (spec §4.6 "SharedData", §5
//! "`SharedData` explicitly uses atomic refcounts; its contents are
//! accessed only under its own lock").
//!
//! Unlike `crate::heap`'s per-box refcount (a plain, deliberately
//! non-atomic `Cell<usize>` — spec §5's "reference-count machinery is not
//! thread-safe by default"), the handle this module hands out is an `Arc`,
//! whose refcount *is* atomic, so the handle itself is safe to clone and
//! drop from whatever Tasks or schedulers hold it. The `Value` payload it
//! wraps is read and written only while the inner `parking_lot::Mutex` is
//! held, so no two Tasks ever observe it mid-mutation even if a future
//! embedder binds more than one scheduler to the same process.

use crate::value::Value;
use dashmap::DashMap;
use parking_lot::Mutex as ParkingLotMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SHARED_DATA_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a SharedData cell, stable across the lifetime of
/// the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharedDataId(u64);

impl SharedDataId {
    /// Allocate a fresh, globally unique shared-data ID.
    pub fn new() -> Self {
        SharedDataId(NEXT_SHARED_DATA_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Reconstruct a shared-data ID from its raw numeric value.
    pub fn from_u64(id: u64) -> Self {
        SharedDataId(id)
    }

    /// Get the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SharedDataId {
    fn default() -> Self {
        Self::new()
    }
}

/// A single lock-guarded `Value` slot shared between Tasks. Reading and
/// writing always go through the lock; callers own retain/release
/// discipline for whatever `Value` passes through `get`/`set`, the same
/// convention `crate::eval::frame::Environment::set` uses.
pub struct SharedData {
    id: SharedDataId,
    inner: ParkingLotMutex<Value>,
}

impl SharedData {
    /// Create a new shared cell seeded with `initial`. The caller retains
    /// `initial` on the cell's behalf before calling this, if it is a
    /// pointer-tagged value.
    pub fn new(id: SharedDataId, initial: Value) -> Self {
        Self { id, inner: ParkingLotMutex::new(initial) }
    }

    /// Get the cell ID.
    pub fn id(&self) -> SharedDataId {
        self.id
    }

    /// Read the current value under the lock.
    pub fn get(&self) -> Value {
        *self.inner.lock()
    }

    /// Replace the value under the lock, returning the value that was
    /// there before so the caller can release it.
    pub fn set(&self, new: Value) -> Value {
        std::mem::replace(&mut *self.inner.lock(), new)
    }
}

/// Registry mapping `SharedDataId` to the shared `SharedData` instance.
/// Mirrors [`crate::sync::MutexRegistry`]: every `new SharedData($initial)`
/// expression in evaluated source allocates an entry here.
#[derive(Default)]
pub struct SharedDataRegistry {
    cells: DashMap<SharedDataId, Arc<SharedData>>,
}

impl SharedDataRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { cells: DashMap::new() }
    }

    /// Allocate and register a new shared cell seeded with `initial`,
    /// returning its ID.
    pub fn create(&self, initial: Value) -> SharedDataId {
        let id = SharedDataId::new();
        self.cells.insert(id, Arc::new(SharedData::new(id, initial)));
        id
    }

    /// Look up a registered shared cell by ID.
    pub fn get(&self, id: SharedDataId) -> Option<Arc<SharedData>> {
        self.cells.get(&id).map(|entry| entry.clone())
    }

    /// Remove a shared cell from the registry.
    pub fn remove(&self, id: SharedDataId) -> Option<Arc<SharedData>> {
        self.cells.remove(&id).map(|(_, c)| c)
    }

    /// Number of live shared cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the registry holds no shared cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_reflects_initial_value() {
        let cell = SharedData::new(SharedDataId::new(), Value::of_int(5));
        assert_eq!(cell.get().as_int(), Some(5));
    }

    #[test]
    fn set_returns_previous_value_and_updates() {
        let cell = SharedData::new(SharedDataId::new(), Value::of_int(1));
        let old = cell.set(Value::of_int(2));
        assert_eq!(old.as_int(), Some(1));
        assert_eq!(cell.get().as_int(), Some(2));
    }

    #[test]
    fn registry_create_get_remove() {
        let registry = SharedDataRegistry::new();
        let id = registry.create(Value::null());
        assert!(registry.get(id).unwrap().get().is_null());
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }
}
