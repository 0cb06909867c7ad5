//! Lock-free atomic integer cell (spec §4.6 "Atomic"): `load`/`store`/
//! `compare_exchange` over a single 64-bit signed integer, for counters and
//! flags shared between Tasks without going through a [`crate::sync::Mutex`].
//!
//! Unlike the Mutex/RwLock/Channel primitives, an atomic cell never blocks a
//! Task — every operation here is a single hardware atomic instruction —
//! so there is no wait queue and no `BlockReason` to report.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ATOMIC_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an Atomic cell, stable across the lifetime of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomicId(u64);

impl AtomicId {
    /// Allocate a fresh, globally unique atomic-cell ID.
    pub fn new() -> Self {
        AtomicId(NEXT_ATOMIC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Reconstruct an atomic-cell ID from its raw numeric value.
    pub fn from_u64(id: u64) -> Self {
        AtomicId(id)
    }

    /// Get the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for AtomicId {
    fn default() -> Self {
        Self::new()
    }
}

/// A single atomically-accessed signed 64-bit integer cell.
pub struct AtomicCell {
    id: AtomicId,
    value: AtomicI64,
}

impl AtomicCell {
    /// Create a new atomic cell seeded with `initial`.
    pub fn new(id: AtomicId, initial: i64) -> Self {
        Self { id, value: AtomicI64::new(initial) }
    }

    /// Get the cell ID.
    pub fn id(&self) -> AtomicId {
        self.id
    }

    /// Read the current value.
    pub fn load(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Overwrite the current value.
    pub fn store(&self, v: i64) {
        self.value.store(v, Ordering::SeqCst);
    }

    /// If the current value equals `expected`, replace it with `new` and
    /// return `true`; otherwise leave it unchanged and return `false`.
    pub fn compare_exchange(&self, expected: i64, new: i64) -> bool {
        self.value.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    /// Add `delta` to the current value, returning the value from before
    /// the add.
    pub fn fetch_add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst)
    }
}

/// Registry mapping `AtomicId` to the shared `AtomicCell` instance. Mirrors
/// [`crate::sync::MutexRegistry`]: every `new Atomic($initial)` expression
/// in evaluated source allocates an entry here.
#[derive(Default)]
pub struct AtomicRegistry {
    cells: DashMap<AtomicId, Arc<AtomicCell>>,
}

impl AtomicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { cells: DashMap::new() }
    }

    /// Allocate and register a new atomic cell seeded with `initial`,
    /// returning its ID.
    pub fn create(&self, initial: i64) -> AtomicId {
        let id = AtomicId::new();
        self.cells.insert(id, Arc::new(AtomicCell::new(id, initial)));
        id
    }

    /// Look up a registered atomic cell by ID.
    pub fn get(&self, id: AtomicId) -> Option<Arc<AtomicCell>> {
        self.cells.get(&id).map(|entry| entry.clone())
    }

    /// Remove an atomic cell from the registry.
    pub fn remove(&self, id: AtomicId) -> Option<Arc<AtomicCell>> {
        self.cells.remove(&id).map(|(_, c)| c)
    }

    /// Number of live atomic cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the registry holds no atomic cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reflects_initial_value() {
        let cell = AtomicCell::new(AtomicId::new(), 7);
        assert_eq!(cell.load(), 7);
    }

    #[test]
    fn store_then_load_round_trips() {
        let cell = AtomicCell::new(AtomicId::new(), 0);
        cell.store(42);
        assert_eq!(cell.load(), 42);
    }

    #[test]
    fn compare_exchange_succeeds_on_match_and_fails_otherwise() {
        let cell = AtomicCell::new(AtomicId::new(), 10);
        assert!(!cell.compare_exchange(5, 99));
        assert_eq!(cell.load(), 10);
        assert!(cell.compare_exchange(10, 99));
        assert_eq!(cell.load(), 99);
    }

    #[test]
    fn fetch_add_returns_previous_value() {
        let cell = AtomicCell::new(AtomicId::new(), 1);
        assert_eq!(cell.fetch_add(4), 1);
        assert_eq!(cell.load(), 5);
    }

    #[test]
    fn registry_create_get_remove() {
        let registry = AtomicRegistry::new();
        let id = registry.create(3);
        assert_eq!(registry.get(id).unwrap().load(), 3);
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }
}
