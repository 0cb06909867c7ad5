//! Cooperative concurrency substrate (spec §4.6).
//!
//! A [`Scheduler`] runs any number of [`Task`]s (coroutines) cooperatively:
//! only one is ever executing interpreter code at a time, and control only
//! changes hands at explicit suspension points — `yield`, a blocking
//! [`Channel`] send/receive, or a contended [`crate::sync::Mutex`] wait.
//! There is no asynchronous preemption.

mod channel;
mod registry;
mod runtime;
mod task;

pub use channel::{Channel, ChannelError, ChannelId, RecvOutcome, SendOutcome};
pub use registry::ChannelRegistry;
pub use runtime::{Scheduler, SchedulerLimits, SchedulerStats};
pub use task::{Task, TaskId, TaskState};
