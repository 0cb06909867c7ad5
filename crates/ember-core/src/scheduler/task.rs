//! Task identity and cooperative-scheduling state (spec §4.6 "Cooperative
//! concurrency substrate"). A `Task` is the scheduler's record of one
//! coroutine: its lifecycle state, its eventual result or thrown exception,
//! and who is waiting on it. It owns none of the actual suspension
//! mechanics — [`crate::scheduler::Scheduler`] does that — so this type
//! stays plain data, safe to read from any thread.

use crate::value::Value;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Unique identifier for a Task, stable for the lifetime of the runtime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate a fresh, globally unique task ID.
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a Task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, has never held the scheduler's turn yet.
    Ready,
    /// Currently holds the scheduler's turn and is executing.
    Running,
    /// Suspended at an explicit point (channel op, mutex wait, `yield`),
    /// waiting for something else to wake it.
    Blocked,
    /// Finished normally; a result is available.
    Completed,
    /// Finished with an uncaught exception.
    Failed,
}

/// A single coroutine tracked by a [`crate::scheduler::Scheduler`].
pub struct Task {
    id: TaskId,
    state: Mutex<TaskState>,
    result: Mutex<Option<Value>>,
    exception: Mutex<Option<Value>>,
    waiters: Mutex<Vec<TaskId>>,
    parent: Option<TaskId>,
    cancel_requested: AtomicBool,
}

impl Task {
    pub fn new(parent: Option<TaskId>) -> Self {
        Self {
            id: TaskId::new(),
            state: Mutex::new(TaskState::Ready),
            result: Mutex::new(None),
            exception: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
            parent,
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    /// Record a normal result and move to `Completed`.
    pub fn complete(&self, result: Value) {
        *self.result.lock() = Some(result);
        self.set_state(TaskState::Completed);
    }

    /// Record an uncaught exception and move to `Failed`.
    pub fn fail_with(&self, exception: Value) {
        *self.exception.lock() = Some(exception);
        self.set_state(TaskState::Failed);
    }

    /// Move to `Failed` without a specific exception value (e.g. a Rust
    /// panic inside the task body).
    pub fn fail(&self) {
        self.set_state(TaskState::Failed);
    }

    pub fn result(&self) -> Option<Value> {
        *self.result.lock()
    }

    pub fn exception(&self) -> Option<Value> {
        *self.exception.lock()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Completed | TaskState::Failed)
    }

    /// Register `waiter` to be woken once this task finishes.
    pub fn add_waiter(&self, waiter: TaskId) {
        self.waiters.lock().push(waiter);
    }

    /// Drain every task waiting on this one (FIFO order preserved).
    pub fn take_waiters(&self) -> Vec<TaskId> {
        std::mem::take(&mut *self.waiters.lock())
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique_and_increasing() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn fresh_task_starts_ready_with_no_result() {
        let task = Task::new(None);
        assert_eq!(task.state(), TaskState::Ready);
        assert!(task.result().is_none());
        assert!(!task.is_finished());
    }

    #[test]
    fn complete_records_result_and_state() {
        let task = Task::new(None);
        task.complete(Value::of_int(7));
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.result(), Some(Value::of_int(7)));
        assert!(task.is_finished());
    }

    #[test]
    fn fail_with_records_exception() {
        let task = Task::new(None);
        task.fail_with(Value::of_int(13));
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.exception(), Some(Value::of_int(13)));
        assert!(task.is_finished());
    }

    #[test]
    fn waiters_drain_once_in_fifo_order() {
        let task = Task::new(None);
        let w1 = TaskId::new();
        let w2 = TaskId::new();
        task.add_waiter(w1);
        task.add_waiter(w2);
        assert_eq!(task.take_waiters(), vec![w1, w2]);
        assert!(task.take_waiters().is_empty());
    }

    #[test]
    fn cancellation_flag_round_trips() {
        let task = Task::new(None);
        assert!(!task.is_cancel_requested());
        task.request_cancel();
        assert!(task.is_cancel_requested());
    }
}
