//! Global registry of live Mutex instances, keyed by MutexId

use crate::sync::{Mutex, MutexId};
use dashmap::DashMap;
use std::sync::Arc;

/// Registry mapping MutexId to the shared Mutex instance
///
/// Every `new Mutex()` expression in evaluated source allocates an entry
/// here; the `Value` held by the program is just the `MutexId`, so mutexes
/// can be captured by closures and shared between tasks without the
/// evaluator needing to know about locking internals.
#[derive(Default)]
pub struct MutexRegistry {
    mutexes: DashMap<MutexId, Arc<Mutex>>,
}

impl MutexRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            mutexes: DashMap::new(),
        }
    }

    /// Allocate and register a new mutex, returning its ID
    pub fn create(&self) -> MutexId {
        let id = MutexId::new();
        self.mutexes.insert(id, Arc::new(Mutex::new(id)));
        id
    }

    /// Look up a registered mutex by ID
    pub fn get(&self, id: MutexId) -> Option<Arc<Mutex>> {
        self.mutexes.get(&id).map(|entry| entry.clone())
    }

    /// Remove a mutex from the registry (called once its Value is collected)
    pub fn remove(&self, id: MutexId) -> Option<Arc<Mutex>> {
        self.mutexes.remove(&id).map(|(_, m)| m)
    }

    /// Number of live mutexes
    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    /// Whether the registry holds no mutexes
    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }
}
