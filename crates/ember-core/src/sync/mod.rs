//! Synchronization primitives for Task coordination
//!
//! This module provides goroutine-style synchronization primitives that block
//! at the Task level instead of the OS thread level, allowing efficient
//! multi-Task concurrency.

mod atomic;
mod guard;
mod mutex;
mod mutex_id;
mod registry;
mod rwlock;
mod serialize;
mod shared_data;

pub use atomic::{AtomicCell, AtomicId, AtomicRegistry};
pub use guard::{MutexGuard, OwnedMutexGuard};
pub use mutex::{BlockReason, Mutex, MutexError};
pub use mutex_id::MutexId;
pub use registry::MutexRegistry;
pub use rwlock::{RwBlockReason, RwLock, RwLockError, RwLockId, RwLockRegistry};
pub use serialize::SerializedMutex;
pub use shared_data::{SharedData, SharedDataId, SharedDataRegistry};
