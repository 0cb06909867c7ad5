//! Single-threaded cooperative scheduler (spec §4.6 "Cooperative
//! concurrency substrate").
//!
//! Tasks are coroutines layered over real OS threads: each spawned Task
//! gets its own thread purely so that a blocking evaluator call (channel
//! send/receive, mutex wait, explicit `yield`) can suspend its Rust call
//! stack without a stackful-coroutine crate. Only one Task's thread ever
//! executes interpreter code at a time — the scheduler hands a single
//! cooperative "turn" between them in strict FIFO order, so the threads
//! never race inside the VM. A Task only ever gives up its turn at an
//! explicit suspension point; nothing preempts it asynchronously. Genuine
//! OS-level parallelism only appears if the embedder stands up more than
//! one `Scheduler` instance.

use crate::scheduler::task::{Task, TaskId, TaskState};
use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerLimits {
    /// Upper bound on simultaneously live tasks; spawning past this panics
    /// the calling task rather than let the scheduler grow unbounded.
    pub max_tasks: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self { max_tasks: 10_000 }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
}

struct State {
    ready: VecDeque<TaskId>,
    current: Option<TaskId>,
    stats: SchedulerStats,
}

struct Inner {
    state: Mutex<State>,
    turn_changed: Condvar,
    tasks: Mutex<FxHashMap<TaskId, Arc<Task>>>,
    limits: SchedulerLimits,
}

/// A single cooperative scheduler. Cheap to clone — every clone shares the
/// same underlying task table and ready queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_limits(SchedulerLimits::default())
    }

    pub fn with_limits(limits: SchedulerLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State { ready: VecDeque::new(), current: None, stats: SchedulerStats::default() }),
                turn_changed: Condvar::new(),
                tasks: Mutex::new(FxHashMap::default()),
                limits,
            }),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.state.lock().stats
    }

    pub fn task_count(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.inner.tasks.lock().get(&id).map(|t| t.state())
    }

    pub fn task_result(&self, id: TaskId) -> Option<Value> {
        self.inner.tasks.lock().get(&id).and_then(|t| t.result())
    }

    /// Spawn a new Task running `body` on its own OS thread. `body` is
    /// given the scheduler and its own id so it can call back into
    /// [`Scheduler::yield_now`] / channel and mutex operations. Its return
    /// value becomes the task's result; a Rust panic inside `body` is
    /// caught and recorded as a task failure rather than taking down the
    /// process.
    pub fn spawn<F>(&self, parent: Option<TaskId>, body: F) -> TaskId
    where
        F: FnOnce(&Scheduler, TaskId) -> Value + Send + 'static,
    {
        let task = Arc::new(Task::new(parent));
        let id = task.id();

        {
            let mut tasks = self.inner.tasks.lock();
            assert!(tasks.len() < self.inner.limits.max_tasks, "scheduler task limit exceeded");
            tasks.insert(id, task.clone());
        }
        {
            let mut state = self.inner.state.lock();
            state.ready.push_back(id);
            state.stats.spawned += 1;
        }

        let scheduler = self.clone();
        thread::Builder::new()
            .name(format!("ember-task-{}", id.as_u64()))
            .spawn(move || {
                scheduler.wait_for_turn(id);
                task.set_state(TaskState::Running);

                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&scheduler, id)));

                match outcome {
                    Ok(value) => {
                        task.complete(value);
                        scheduler.record_finish(true);
                    }
                    Err(_) => {
                        task.fail();
                        scheduler.record_finish(false);
                    }
                }

                scheduler.retire_current(id);
                for waiter in task.take_waiters() {
                    scheduler.wake(waiter);
                }
            })
            .expect("failed to spawn task thread");

        self.advance();
        id
    }

    /// Voluntarily give up the turn and rejoin the back of the ready
    /// queue; blocks until this task's turn comes back around.
    pub fn yield_now(&self, id: TaskId) {
        if let Some(task) = self.inner.tasks.lock().get(&id).cloned() {
            task.set_state(TaskState::Ready);
        }
        {
            let mut state = self.inner.state.lock();
            state.ready.push_back(id);
            if state.current == Some(id) {
                state.current = None;
            }
        }
        self.advance();
        self.wait_for_turn(id);
        if let Some(task) = self.inner.tasks.lock().get(&id).cloned() {
            task.set_state(TaskState::Running);
        }
    }

    /// Give up the turn without rejoining the ready queue. The caller
    /// (e.g. a channel or mutex operation that reported `Blocked`) is
    /// responsible for calling [`Scheduler::wake`] once the condition this
    /// task was waiting on is satisfied.
    pub fn block_current(&self, id: TaskId) {
        if let Some(task) = self.inner.tasks.lock().get(&id).cloned() {
            task.set_state(TaskState::Blocked);
        }
        {
            let mut state = self.inner.state.lock();
            if state.current == Some(id) {
                state.current = None;
            }
        }
        self.advance();
        self.wait_for_turn(id);
        if let Some(task) = self.inner.tasks.lock().get(&id).cloned() {
            task.set_state(TaskState::Running);
        }
    }

    /// Request cooperative cancellation of `id`. Has no effect on a task
    /// that has already finished; a running task only observes this at its
    /// own next checkpoint (there is no preemption), so this call never
    /// blocks.
    pub fn request_cancel(&self, id: TaskId) {
        if let Some(task) = self.inner.tasks.lock().get(&id) {
            task.request_cancel();
        }
    }

    /// Whether cancellation has been requested for `id`.
    pub fn is_cancel_requested(&self, id: TaskId) -> bool {
        self.inner.tasks.lock().get(&id).map(|t| t.is_cancel_requested()).unwrap_or(false)
    }

    /// Move a blocked task back onto the ready queue.
    pub fn wake(&self, id: TaskId) {
        {
            let mut state = self.inner.state.lock();
            state.ready.push_back(id);
        }
        self.advance();
    }

    /// Block the calling task until `target` has completed, returning its
    /// result (or `None` if it failed).
    pub fn join(&self, waiting: TaskId, target: TaskId) -> Option<Value> {
        loop {
            let task = self.inner.tasks.lock().get(&target).cloned()?;
            match task.state() {
                TaskState::Completed => return task.result(),
                TaskState::Failed => return None,
                _ => {
                    task.add_waiter(waiting);
                    self.block_current(waiting);
                }
            }
        }
    }

    /// Block the *calling OS thread* (not a task — this is for the
    /// embedder's main thread) until no task is running or ready.
    pub fn wait_idle(&self) {
        let mut state = self.inner.state.lock();
        while state.current.is_some() || !state.ready.is_empty() {
            self.inner.turn_changed.wait(&mut state);
        }
    }

    fn wait_for_turn(&self, id: TaskId) {
        let mut state = self.inner.state.lock();
        while state.current != Some(id) {
            self.inner.turn_changed.wait(&mut state);
        }
    }

    fn retire_current(&self, id: TaskId) {
        let mut state = self.inner.state.lock();
        if state.current == Some(id) {
            state.current = None;
        }
        drop(state);
        self.advance();
    }

    fn record_finish(&self, success: bool) {
        let mut state = self.inner.state.lock();
        if success {
            state.stats.completed += 1;
        } else {
            state.stats.failed += 1;
        }
    }

    /// If nobody currently holds the turn, hand it to the next ready task
    /// (FIFO) and wake every thread parked in `wait_for_turn`/`wait_idle`.
    fn advance(&self) {
        let mut state = self.inner.state.lock();
        if state.current.is_none() {
            state.current = state.ready.pop_front();
        }
        self.inner.turn_changed.notify_all();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn single_task_runs_to_completion() {
        let sched = Scheduler::new();
        let id = sched.spawn(None, |_s, _id| Value::of_int(42));
        sched.wait_idle();
        assert_eq!(sched.task_result(id), Some(Value::of_int(42)));
        assert_eq!(sched.stats().completed, 1);
    }

    #[test]
    fn yielding_task_lets_another_task_run_first() {
        let sched = Scheduler::new();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        let _a = sched.spawn(None, move |s, id| {
            s.yield_now(id);
            order_a.lock().push("a");
            Value::null()
        });

        let order_b = order.clone();
        let _b = sched.spawn(None, move |_s, _id| {
            order_b.lock().push("b");
            Value::null()
        });

        sched.wait_idle();
        // "a" yields immediately, letting "b" (already queued behind it)
        // run to completion before "a" gets its turn back.
        assert_eq!(*order.lock(), vec!["b", "a"]);
    }

    #[test]
    fn join_observes_completed_result() {
        let sched = Scheduler::new();
        let producer = sched.spawn(None, |_s, _id| Value::of_int(99));

        let sched2 = sched.clone();
        let consumer = sched.spawn(None, move |s, id| {
            s.join(id, producer).unwrap_or(Value::null())
        });
        let _ = sched2;

        sched.wait_idle();
        assert_eq!(sched.task_result(consumer), Some(Value::of_int(99)));
    }

    #[test]
    fn panicking_task_is_recorded_as_failed() {
        let sched = Scheduler::new();
        let id = sched.spawn(None, |_s, _id| panic!("boom"));
        sched.wait_idle();
        assert_eq!(sched.task_state(id), Some(TaskState::Failed));
        assert_eq!(sched.stats().failed, 1);
    }

    #[test]
    fn many_tasks_all_complete() {
        let sched = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            sched.spawn(None, move |_s, _id| {
                counter.fetch_add(1, Ordering::SeqCst);
                Value::null()
            });
        }
        sched.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(sched.stats().completed, 20);
    }

    #[test]
    fn cancel_request_is_observable_by_id() {
        let sched = Scheduler::new();
        let id = sched.spawn(None, |_s, _id| Value::null());
        assert!(!sched.is_cancel_requested(id));
        sched.request_cancel(id);
        assert!(sched.is_cancel_requested(id));
        sched.wait_idle();
    }

    #[test]
    fn cancel_on_unknown_task_is_a_no_op() {
        let sched = Scheduler::new();
        sched.request_cancel(TaskId::new());
    }

    #[test]
    fn block_and_wake_resumes_a_suspended_task() {
        let sched = Scheduler::new();
        let woke = Arc::new(AtomicUsize::new(0));
        let woke2 = woke.clone();

        let sched_clone = sched.clone();
        let id = sched.spawn(None, move |s, id| {
            s.block_current(id);
            woke2.fetch_add(1, Ordering::SeqCst);
            Value::null()
        });

        // Give the task a moment to reach block_current before waking it.
        thread::sleep(Duration::from_millis(20));
        sched_clone.wake(id);

        sched.wait_idle();
        assert_eq!(woke.load(Ordering::SeqCst), 1);
    }
}
