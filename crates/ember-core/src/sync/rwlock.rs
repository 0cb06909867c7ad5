//! Task-aware read/write lock (spec §4.6 "RwLock").
//!
//! Mirrors [`crate::sync::Mutex`]'s decision-only shape: `try_read`/
//! `try_write` never block the calling OS thread, instead reporting
//! whether the lock was granted immediately or the calling Task must
//! suspend until woken. Readers are shared (any number of Tasks may hold
//! a read lock at once); a writer is exclusive and is only admitted once
//! every current reader — and any writer ahead of it in the wait queue —
//! has released, so a steady stream of readers cannot starve a waiting
//! writer.

use crate::scheduler::TaskId;
use dashmap::DashMap;
use parking_lot::Mutex as ParkingLotMutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_RWLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an RwLock, stable across the lifetime of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RwLockId(u64);

impl RwLockId {
    /// Allocate a fresh, globally unique rwlock ID.
    pub fn new() -> Self {
        RwLockId(NEXT_RWLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Reconstruct an rwlock ID from its raw numeric value.
    pub fn from_u64(id: u64) -> Self {
        RwLockId(id)
    }

    /// Get the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for RwLockId {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when releasing an RwLock.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RwLockError {
    /// RwLock not found in registry.
    #[error("RwLock {0:?} not found")]
    NotFound(RwLockId),

    /// Read-unlock called by a Task that does not currently hold a read lock.
    #[error("read unlock called by Task {0:?} that holds no read lock")]
    NotReader(TaskId),

    /// Write-unlock called by a Task other than the current writer.
    #[error("write unlock called by non-owner Task {0:?}")]
    NotOwner(TaskId),
}

/// Reason a Task is blocked on an RwLock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwBlockReason {
    AwaitingRead(RwLockId),
    AwaitingWrite(RwLockId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waiter {
    Reader(TaskId),
    Writer(TaskId),
}

#[derive(Default)]
struct State {
    readers: HashSet<TaskId>,
    writer: Option<TaskId>,
    wait_queue: VecDeque<Waiter>,
}

/// Task-aware read/write lock with goroutine-style blocking semantics,
/// analogous to [`crate::sync::Mutex`] but admitting concurrent readers.
pub struct RwLock {
    id: RwLockId,
    state: ParkingLotMutex<State>,
}

impl RwLock {
    /// Create a new rwlock with unique ID.
    pub fn new(id: RwLockId) -> Self {
        Self { id, state: ParkingLotMutex::new(State::default()) }
    }

    /// Get the rwlock ID.
    pub fn id(&self) -> RwLockId {
        self.id
    }

    /// Attempt to acquire a shared read lock. Succeeds immediately unless a
    /// writer currently holds the lock or one is queued ahead of this task.
    pub fn try_read(&self, task_id: TaskId) -> Result<(), RwBlockReason> {
        let mut state = self.state.lock();
        if state.readers.contains(&task_id) {
            return Ok(());
        }
        let writer_waiting = state.wait_queue.iter().any(|w| matches!(w, Waiter::Writer(_)));
        if state.writer.is_none() && !writer_waiting {
            state.readers.insert(task_id);
            Ok(())
        } else {
            state.wait_queue.push_back(Waiter::Reader(task_id));
            Err(RwBlockReason::AwaitingRead(self.id))
        }
    }

    /// Attempt to acquire the exclusive write lock.
    pub fn try_write(&self, task_id: TaskId) -> Result<(), RwBlockReason> {
        let mut state = self.state.lock();
        if state.writer == Some(task_id) {
            return Err(RwBlockReason::AwaitingWrite(self.id));
        }
        if state.writer.is_none() && state.readers.is_empty() {
            state.writer = Some(task_id);
            Ok(())
        } else {
            state.wait_queue.push_back(Waiter::Writer(task_id));
            Err(RwBlockReason::AwaitingWrite(self.id))
        }
    }

    /// Release a read lock, admitting queued waiters the release now makes
    /// eligible. Returns the Tasks to wake, in admission order.
    pub fn unlock_read(&self, task_id: TaskId) -> Result<Vec<TaskId>, RwLockError> {
        let mut state = self.state.lock();
        if !state.readers.remove(&task_id) {
            return Err(RwLockError::NotReader(task_id));
        }
        Ok(if state.readers.is_empty() { Self::admit_next(&mut state) } else { Vec::new() })
    }

    /// Release the write lock, admitting queued waiters. Returns the Tasks
    /// to wake, in admission order.
    pub fn unlock_write(&self, task_id: TaskId) -> Result<Vec<TaskId>, RwLockError> {
        let mut state = self.state.lock();
        if state.writer != Some(task_id) {
            return Err(RwLockError::NotOwner(task_id));
        }
        state.writer = None;
        Ok(Self::admit_next(&mut state))
    }

    /// Pop waiters off the front of the queue, admitting either a run of
    /// readers or a single writer, whichever the front of the queue calls
    /// for. Stops as soon as the front waiter cannot yet be admitted.
    fn admit_next(state: &mut State) -> Vec<TaskId> {
        let mut woken = Vec::new();
        while let Some(front) = state.wait_queue.front().copied() {
            match front {
                Waiter::Writer(task) => {
                    if state.writer.is_none() && state.readers.is_empty() {
                        state.wait_queue.pop_front();
                        state.writer = Some(task);
                        woken.push(task);
                    }
                    break;
                }
                Waiter::Reader(task) => {
                    if state.writer.is_some() {
                        break;
                    }
                    state.wait_queue.pop_front();
                    state.readers.insert(task);
                    woken.push(task);
                }
            }
        }
        woken
    }

    /// Whether the write lock is currently held.
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// Whether `task_id` specifically holds the write lock right now —
    /// true for a task that was just handed the lock by `admit_next` and
    /// hasn't retried `try_write` yet.
    pub fn is_write_locked_by(&self, task_id: TaskId) -> bool {
        self.state.lock().writer == Some(task_id)
    }

    /// Number of tasks currently holding a read lock.
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }
}

/// Registry mapping `RwLockId` to the shared `RwLock` instance. Mirrors
/// [`crate::sync::MutexRegistry`]: every `new RwLock()` expression in
/// evaluated source allocates an entry here.
#[derive(Default)]
pub struct RwLockRegistry {
    locks: DashMap<RwLockId, Arc<RwLock>>,
}

impl RwLockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Allocate and register a new rwlock, returning its ID.
    pub fn create(&self) -> RwLockId {
        let id = RwLockId::new();
        self.locks.insert(id, Arc::new(RwLock::new(id)));
        id
    }

    /// Look up a registered rwlock by ID.
    pub fn get(&self, id: RwLockId) -> Option<Arc<RwLock>> {
        self.locks.get(&id).map(|entry| entry.clone())
    }

    /// Remove an rwlock from the registry.
    pub fn remove(&self, id: RwLockId) -> Option<Arc<RwLock>> {
        self.locks.remove(&id).map(|(_, l)| l)
    }

    /// Number of live rwlocks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the registry holds no rwlocks.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_readers_are_both_admitted() {
        let lock = RwLock::new(RwLockId::new());
        let t1 = TaskId::new();
        let t2 = TaskId::new();
        assert!(lock.try_read(t1).is_ok());
        assert!(lock.try_read(t2).is_ok());
        assert_eq!(lock.reader_count(), 2);
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn writer_excludes_readers_and_vice_versa() {
        let lock = RwLock::new(RwLockId::new());
        let writer = TaskId::new();
        let reader = TaskId::new();
        assert!(lock.try_write(writer).is_ok());
        assert!(lock.try_read(reader).is_err());
        assert!(lock.unlock_write(writer).unwrap().is_empty());
        assert!(lock.try_read(reader).is_ok());
        let other_writer = TaskId::new();
        assert!(lock.try_write(other_writer).is_err());
    }

    #[test]
    fn pending_writer_is_admitted_once_all_readers_release() {
        let lock = RwLock::new(RwLockId::new());
        let r1 = TaskId::new();
        let r2 = TaskId::new();
        let writer = TaskId::new();
        assert!(lock.try_read(r1).is_ok());
        assert!(lock.try_read(r2).is_ok());
        assert!(lock.try_write(writer).is_err());

        assert!(lock.unlock_read(r1).unwrap().is_empty());
        assert!(!lock.is_write_locked());

        let woken = lock.unlock_read(r2).unwrap();
        assert_eq!(woken, vec![writer]);
        assert!(lock.is_write_locked());
    }

    #[test]
    fn queued_writer_blocks_a_later_reader_from_jumping_ahead() {
        let lock = RwLock::new(RwLockId::new());
        let first_writer = TaskId::new();
        let blocked_writer = TaskId::new();
        let late_reader = TaskId::new();

        assert!(lock.try_write(first_writer).is_ok());
        assert!(lock.try_write(blocked_writer).is_err());
        // A reader arriving after a writer is already queued must wait
        // behind it rather than sneaking in once the writer releases.
        assert!(lock.try_read(late_reader).is_err());

        let woken = lock.unlock_write(first_writer).unwrap();
        assert_eq!(woken, vec![blocked_writer]);
        assert!(lock.is_write_locked());
    }

    #[test]
    fn unlock_read_without_holding_errors() {
        let lock = RwLock::new(RwLockId::new());
        let task = TaskId::new();
        assert_eq!(lock.unlock_read(task), Err(RwLockError::NotReader(task)));
    }

    #[test]
    fn unlock_write_by_non_owner_errors() {
        let lock = RwLock::new(RwLockId::new());
        let owner = TaskId::new();
        let other = TaskId::new();
        lock.try_write(owner).unwrap();
        assert_eq!(lock.unlock_write(other), Err(RwLockError::NotOwner(other)));
    }

    #[test]
    fn write_handoff_target_is_reported_write_locked_before_retrying_try_write() {
        // Mirrors Mutex's wait-queue handoff: `unlock_write` hands the lock
        // straight to the next queued writer via `admit_next`, rather than
        // clearing to `None` and making that writer re-acquire through
        // `try_write`. A caller retrying `try_write` for the handed-off task
        // would hit the reentrant-lock guard at the top of `try_write` and
        // get `Err` for a lock it already holds; `is_write_locked_by` lets a
        // retry loop recognize the handoff and skip the redundant call.
        let lock = RwLock::new(RwLockId::new());
        let first_writer = TaskId::new();
        let queued_writer = TaskId::new();

        assert!(lock.try_write(first_writer).is_ok());
        assert!(lock.try_write(queued_writer).is_err());
        assert!(!lock.is_write_locked_by(queued_writer));

        let woken = lock.unlock_write(first_writer).unwrap();
        assert_eq!(woken, vec![queued_writer]);
        assert!(lock.is_write_locked_by(queued_writer));
        // Retrying `try_write` for the task it was just handed to would
        // wrongly fail, since it looks identical to a reentrant lock attempt.
        assert!(lock.try_write(queued_writer).is_err());
    }

    #[test]
    fn registry_create_get_remove() {
        let registry = RwLockRegistry::new();
        let id = registry.create();
        assert!(registry.get(id).is_some());
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }
}
