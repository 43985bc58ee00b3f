//! Execution contexts: [`Schedule`] for timers, [`Stage`] for tasks and calls

use std::sync::Arc;

use crate::cont::{Call, Cont};
use crate::error::StageResult;
use crate::task::{TaskFunction, TaskRef};
use crate::timer::{TimerFunction, TimerRef};

/// Fire-and-forget work submitted to a stage
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that can fire timers
pub trait Schedule: Send + Sync {
    /// Bind a timer function without scheduling it
    fn timer(&self, timer: Arc<dyn TimerFunction>) -> Arc<dyn TimerRef>;

    /// Bind a timer function and schedule it `millis` from now.
    /// Fails with `NegativeTimeout` if `millis < 0`.
    fn set_timer(&self, millis: i64, timer: Arc<dyn TimerFunction>)
        -> StageResult<Arc<dyn TimerRef>>;
}

/// Something that can run tasks, complete calls, and fire timers
pub trait Stage: Schedule {
    fn execute(&self, job: Job) -> StageResult<()>;

    /// Bind a task function without cueing it
    fn task(&self, task: Arc<dyn TaskFunction>) -> Arc<dyn TaskRef>;

    /// Wrap a continuation so its completion runs on the stage
    fn call<T: Send + 'static>(&self, cont: Arc<dyn Cont<T>>) -> Arc<dyn Call<T>>
    where
        Self: Sized;
}
