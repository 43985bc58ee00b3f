//! Timer vocabulary: "run this at time T"
//!
//! A [`TimerFunction`] is the bare callback. A stateful [`Timer`] also gets
//! lifecycle hooks and a back-reference to the [`TimerContext`] it was bound
//! to, so it can reschedule or cancel itself from inside `run_timer`.
//!
//! The back-reference is weak: a schedule keeps a timer context alive while
//! an event is pending, and the caller keeps it alive through its
//! [`TimerRef`]. A timer that is neither scheduled nor referenced is dropped.

use std::sync::{Arc, Weak};

use crate::error::{StageError, StageResult};
use crate::spinlock::SpinLock;

/// A unit of deferred work
pub trait TimerFunction: Send + Sync + 'static {
    /// Invoked once per elapsed schedule/reschedule
    fn run_timer(&self);

    /// Capability query for lifecycle hooks; stateful timers return `Some(self)`
    fn as_timer(&self) -> Option<&dyn Timer> {
        None
    }
}

/// A timer function that tracks its own context and observes its lifecycle
pub trait Timer: TimerFunction {
    fn timer_context(&self) -> Option<Arc<dyn TimerContext>>;

    /// Called once when the timer is bound to a schedule
    fn set_timer_context(&self, context: Weak<dyn TimerContext>);

    /// Called before each schedule/reschedule with the requested delay
    fn timer_will_schedule(&self, millis: i64) {
        let _ = millis;
    }

    /// Called by whichever thread's cancel actually prevented a pending fire
    fn timer_did_cancel(&self) {}
}

/// Caller-side handle to a bound timer
pub trait TimerRef: Send + Sync {
    /// Whether a fire is currently pending
    fn is_scheduled(&self) -> bool;

    /// Cancel any pending fire and schedule a new one `millis` from now
    fn reschedule(&self, millis: i64) -> StageResult<()>;

    /// Cancel the pending fire; returns whether a fire was prevented
    fn cancel(&self) -> bool;
}

/// Schedule-side binding of one timer function
pub trait TimerContext: TimerRef {
    fn timer_function(&self) -> Arc<dyn TimerFunction>;
}

/// Storage for a stateful timer's weak back-reference
#[derive(Default)]
pub struct TimerContextCell {
    context: SpinLock<Option<Weak<dyn TimerContext>>>,
}

impl TimerContextCell {
    pub const fn new() -> Self {
        Self {
            context: SpinLock::new(None),
        }
    }

    pub fn get(&self) -> Option<Arc<dyn TimerContext>> {
        self.context.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn set(&self, context: Weak<dyn TimerContext>) {
        *self.context.lock() = Some(context);
    }

    pub fn is_scheduled(&self) -> bool {
        self.get().map_or(false, |context| context.is_scheduled())
    }

    /// Reschedule through the bound context
    pub fn reschedule(&self, millis: i64) -> StageResult<()> {
        match self.get() {
            Some(context) => context.reschedule(millis),
            None => Err(StageError::Unbound),
        }
    }

    pub fn cancel(&self) -> bool {
        self.get().map_or(false, |context| context.cancel())
    }
}

/// Adapter turning a closure into a timer function
pub struct FnTimer<F>(pub F);

impl<F> TimerFunction for FnTimer<F>
where
    F: Fn() + Send + Sync + 'static,
{
    fn run_timer(&self) {
        (self.0)()
    }
}

/// Box a closure as a shareable timer function
pub fn timer_fn<F>(f: F) -> Arc<dyn TimerFunction>
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(FnTimer(f))
}
