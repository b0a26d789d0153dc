//! Threaded task interface consumed by the scheduler.
//!
//! The thread pool itself lives outside this crate. It is expected to call
//! `get_priority` and `is_cancelled` while a task is queued, `run` on a
//! worker thread, and `apply_result` on the consumer side afterwards.

use crate::streaming::priority::TaskPriority;

/// Per-invocation context handed to [`ThreadedTask::run`].
pub struct TaskContext {
    pub thread_index: usize,
}

/// A unit of blocking work with priority and cancellation hooks.
pub trait ThreadedTask: Send {
    /// Blocking work, executed on a worker thread. There is no mid-run
    /// cancellation; long I/O runs to completion.
    fn run(&mut self, ctx: &mut TaskContext);

    /// Re-evaluated by the scheduler while the task is queued.
    fn get_priority(&mut self) -> TaskPriority {
        TaskPriority::MAX
    }

    /// Checked between tasks; cancelled tasks skip `run`.
    fn is_cancelled(&mut self) -> bool {
        false
    }

    /// Runs on the consumer side once the task completed or was cancelled.
    fn apply_result(&mut self);
}

/// Handle to the runtime that executes [`ThreadedTask`]s.
pub trait TaskRuntime: Send + Sync {
    /// Queue a task for asynchronous execution.
    fn push_async_task(&self, task: Box<dyn ThreadedTask>);
}
