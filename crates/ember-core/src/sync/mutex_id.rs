//! Unique identifiers for Mutex instances

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MUTEX_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a Mutex, stable across the lifetime of the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutexId(u64);

impl MutexId {
    /// Allocate a fresh, globally unique mutex ID
    pub fn new() -> Self {
        MutexId(NEXT_MUTEX_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Reconstruct a mutex ID from its raw numeric value
    pub fn from_u64(id: u64) -> Self {
        MutexId(id)
    }

    /// Get the raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for MutexId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutex_id_unique() {
        let a = MutexId::new();
        let b = MutexId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_mutex_id_roundtrip() {
        let id = MutexId::new();
        let raw = id.as_u64();
        assert_eq!(MutexId::from_u64(raw), id);
    }
}
