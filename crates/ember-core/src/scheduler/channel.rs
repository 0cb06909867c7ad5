//! Bounded buffered FIFO channel (spec §4.6 "Channel"). Mirrors
//! [`crate::sync::Mutex`]'s decision-only shape: `try_send`/`try_recv`
//! never block the calling OS thread. Each reports whether the operation
//! completed immediately or the calling Task must suspend, and hands back
//! at most one other Task to wake — the [`crate::scheduler::Scheduler`]
//! that owns both Tasks performs the actual parking and waking.
//!
//! A send that completes immediately (buffers the value or hands it
//! straight to a waiting receiver) happens-before the matching receive
//! observes it: both operations run under the same internal lock, so the
//! buffered value is visible to whichever thread dequeues it next.

use crate::scheduler::TaskId;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    pub fn new() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(id: u64) -> Self {
        ChannelId(id)
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {0:?} is closed")]
    Closed(ChannelId),
}

/// Outcome of [`Channel::try_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The value was buffered (or handed to a waiting receiver); if a
    /// blocked receiver was freed up by this send, its id is included so
    /// the scheduler can wake it.
    Sent { wake: Option<TaskId> },
    /// The buffer was full; the caller was enqueued as a sender waiter and
    /// must suspend until woken.
    Blocked,
}

/// Outcome of [`Channel::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A value was dequeued; if this freed buffer space for a blocked
    /// sender, its id is included so the scheduler can wake it.
    Received { value: Value, wake: Option<TaskId> },
    /// The buffer was empty; the caller was enqueued as a receiver waiter
    /// and must suspend until woken.
    Blocked,
    /// The buffer was empty and the channel is closed; no more values
    /// will ever arrive.
    Closed,
}

struct State {
    buffer: VecDeque<Value>,
    send_waiters: VecDeque<TaskId>,
    recv_waiters: VecDeque<TaskId>,
    closed: bool,
}

/// A bounded, buffered, FIFO channel shared between Tasks.
///
/// Capacity is clamped to at least 1: a zero-capacity (pure rendezvous)
/// channel is not specially optimized, see `DESIGN.md`.
pub struct Channel {
    id: ChannelId,
    capacity: usize,
    state: Mutex<State>,
}

impl Channel {
    pub fn new(id: ChannelId, capacity: usize) -> Self {
        Self {
            id,
            capacity: capacity.max(1),
            state: Mutex::new(State {
                buffer: VecDeque::new(),
                send_waiters: VecDeque::new(),
                recv_waiters: VecDeque::new(),
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempt to enqueue `value`. `task_id` is the sending Task, recorded
    /// as a FIFO waiter if the buffer is full.
    pub fn try_send(&self, task_id: TaskId, value: Value) -> Result<SendOutcome, ChannelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelError::Closed(self.id));
        }
        if state.buffer.len() < self.capacity {
            state.buffer.push_back(value);
            let wake = state.recv_waiters.pop_front();
            Ok(SendOutcome::Sent { wake })
        } else {
            state.send_waiters.push_back(task_id);
            Ok(SendOutcome::Blocked)
        }
    }

    /// Attempt to dequeue a value. `task_id` is the receiving Task,
    /// recorded as a FIFO waiter if the buffer is empty and the channel is
    /// still open.
    pub fn try_recv(&self, task_id: TaskId) -> RecvOutcome {
        let mut state = self.state.lock();
        if let Some(value) = state.buffer.pop_front() {
            let wake = state.send_waiters.pop_front();
            return RecvOutcome::Received { value, wake };
        }
        if state.closed {
            return RecvOutcome::Closed;
        }
        state.recv_waiters.push_back(task_id);
        RecvOutcome::Blocked
    }

    /// Close the channel. Buffered values already sent remain readable;
    /// every currently blocked receiver (there is nothing left to give
    /// them) is returned so the scheduler can wake each with `Closed`.
    pub fn close(&self) -> Vec<TaskId> {
        let mut state = self.state.lock();
        state.closed = true;
        std::mem::take(&mut state.recv_waiters).into_iter().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_below_capacity_does_not_block() {
        let chan = Channel::new(ChannelId::new(), 2);
        let sender = TaskId::new();
        let outcome = chan.try_send(sender, Value::of_int(1)).unwrap();
        assert_eq!(outcome, SendOutcome::Sent { wake: None });
        assert_eq!(chan.len(), 1);
    }

    #[test]
    fn send_at_capacity_blocks_sender() {
        let chan = Channel::new(ChannelId::new(), 1);
        let s1 = TaskId::new();
        let s2 = TaskId::new();
        chan.try_send(s1, Value::of_int(1)).unwrap();
        let outcome = chan.try_send(s2, Value::of_int(2)).unwrap();
        assert_eq!(outcome, SendOutcome::Blocked);
    }

    #[test]
    fn recv_on_empty_channel_blocks_receiver() {
        let chan = Channel::new(ChannelId::new(), 1);
        let receiver = TaskId::new();
        let outcome = chan.try_recv(receiver);
        assert_eq!(outcome, RecvOutcome::Blocked);
    }

    #[test]
    fn recv_wakes_a_blocked_sender_fifo() {
        let chan = Channel::new(ChannelId::new(), 1);
        let s1 = TaskId::new();
        let s2 = TaskId::new();
        chan.try_send(s1, Value::of_int(1)).unwrap();
        let blocked = chan.try_send(s2, Value::of_int(2)).unwrap();
        assert_eq!(blocked, SendOutcome::Blocked);

        let recv = chan.try_recv(TaskId::new());
        match recv {
            RecvOutcome::Received { value, wake } => {
                assert_eq!(value, Value::of_int(1));
                assert_eq!(wake, Some(s2));
            }
            _ => panic!("expected Received"),
        }
    }

    #[test]
    fn send_wakes_a_blocked_receiver_fifo() {
        let chan = Channel::new(ChannelId::new(), 1);
        let r1 = TaskId::new();
        assert_eq!(chan.try_recv(r1), RecvOutcome::Blocked);

        let outcome = chan.try_send(TaskId::new(), Value::of_int(9)).unwrap();
        assert_eq!(outcome, SendOutcome::Sent { wake: Some(r1) });
    }

    #[test]
    fn closed_channel_rejects_new_sends() {
        let chan = Channel::new(ChannelId::new(), 1);
        chan.close();
        let err = chan.try_send(TaskId::new(), Value::of_int(1)).unwrap_err();
        assert_eq!(err, ChannelError::Closed(chan.id()));
    }

    #[test]
    fn closed_empty_channel_reports_closed_to_receiver() {
        let chan = Channel::new(ChannelId::new(), 1);
        chan.close();
        assert_eq!(chan.try_recv(TaskId::new()), RecvOutcome::Closed);
    }

    #[test]
    fn closed_channel_still_drains_buffered_values() {
        let chan = Channel::new(ChannelId::new(), 2);
        chan.try_send(TaskId::new(), Value::of_int(5)).unwrap();
        chan.close();
        match chan.try_recv(TaskId::new()) {
            RecvOutcome::Received { value, .. } => assert_eq!(value, Value::of_int(5)),
            _ => panic!("expected buffered value to survive close"),
        }
        assert_eq!(chan.try_recv(TaskId::new()), RecvOutcome::Closed);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let chan = Channel::new(ChannelId::new(), 0);
        assert_eq!(chan.capacity(), 1);
    }
}
