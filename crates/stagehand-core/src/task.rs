//! Task vocabulary: a sequential unit of work that never runs concurrently
//! with itself
//!
//! Cueing a task requests one execution. Cues that arrive while the task is
//! already running coalesce into exactly one follow-up run.

use std::sync::{Arc, Weak};

use crate::error::{StageError, StageResult};
use crate::spinlock::SpinLock;

pub trait TaskFunction: Send + Sync + 'static {
    fn run_task(&self);

    /// Tasks that block a worker (I/O, locks, sleeps) return true so the
    /// pool can compensate with an extra worker while they run
    fn task_will_block(&self) -> bool {
        false
    }

    /// Capability query for lifecycle hooks; stateful tasks return `Some(self)`
    fn as_task(&self) -> Option<&dyn Task> {
        None
    }
}

/// A task function that tracks its own context and observes its lifecycle
pub trait Task: TaskFunction {
    fn task_context(&self) -> Option<Arc<dyn TaskContext>>;

    fn set_task_context(&self, context: Weak<dyn TaskContext>);

    /// Called by the cue that moved the task from idle to cued
    fn task_will_cue(&self) {}

    /// Called when a cancel prevented a pending run
    fn task_did_cancel(&self) {}
}

/// Caller-side handle to a bound task
pub trait TaskRef: Send + Sync {
    fn is_cued(&self) -> bool;

    /// Request an execution. Returns true if this call changed the task's
    /// state (idle to cued, or running to running+cued).
    fn cue(&self) -> bool;

    /// Withdraw a pending cue; cannot stop a run already in progress
    fn cancel(&self) -> bool;
}

/// Stage-side binding of one task function
pub trait TaskContext: TaskRef {
    fn task_function(&self) -> Arc<dyn TaskFunction>;
}

/// Storage for a stateful task's weak back-reference
#[derive(Default)]
pub struct TaskContextCell {
    context: SpinLock<Option<Weak<dyn TaskContext>>>,
}

impl TaskContextCell {
    pub const fn new() -> Self {
        Self {
            context: SpinLock::new(None),
        }
    }

    pub fn get(&self) -> Option<Arc<dyn TaskContext>> {
        self.context.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn set(&self, context: Weak<dyn TaskContext>) {
        *self.context.lock() = Some(context);
    }

    /// Cue through the bound context
    pub fn cue(&self) -> StageResult<bool> {
        self.get()
            .map(|context| context.cue())
            .ok_or(StageError::Unbound)
    }

    pub fn cancel(&self) -> bool {
        self.get().map_or(false, |context| context.cancel())
    }

    pub fn is_cued(&self) -> bool {
        self.get().map_or(false, |context| context.is_cued())
    }
}

/// Adapter turning a closure into a task function
pub struct FnTask<F>(pub F);

impl<F> TaskFunction for FnTask<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn run_task(&self) {
        (self.0)()
    }
}

/// Adapter for closures that block their worker
pub struct BlockingFnTask<F>(pub F);

impl<F> TaskFunction for BlockingFnTask<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn run_task(&self) {
        (self.0)()
    }

    fn task_will_block(&self) -> bool {
        true
    }
}

pub fn task_fn<F>(f: F) -> Arc<dyn TaskFunction>
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(FnTask(f))
}

pub fn blocking_task_fn<F>(f: F) -> Arc<dyn TaskFunction>
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(BlockingFnTask(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_task_cell() {
        let cell = TaskContextCell::new();
        assert_eq!(cell.cue(), Err(StageError::Unbound));
        assert!(!cell.cancel());
        assert!(!cell.is_cued());
    }

    #[test]
    fn test_blocking_flag() {
        assert!(!task_fn(|| {}).task_will_block());
        assert!(blocking_task_fn(|| {}).task_will_block());
        assert!(task_fn(|| {}).as_task().is_none());
    }
}
