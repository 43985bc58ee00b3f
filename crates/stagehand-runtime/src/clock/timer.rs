//! Clock-side timer binding
//!
//! ```text
//!   ClockTimer ──slot──► ClockTrigger ◄──── ClockEvent (in a bucket)
//!        ▲                    │
//!        └──────armed─────────┘
//! ```
//!
//! A `ClockTimer` owns at most one current trigger. Rescheduling swaps in a
//! new trigger and disarms the old one; firing and cancelling both race to
//! disarm the trigger, and exactly one of them wins.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Weak};

use stagehand_core::error::{StageError, StageResult};
use stagehand_core::fault::catch_non_fatal;
use stagehand_core::timer::{TimerContext, TimerFunction, TimerRef};

use super::{ClockHooks, ClockShared};

/// Shared between a timer's slot and the wheel events that carry it.
/// Holds a strong reference to its timer while armed.
pub(crate) struct ClockTrigger {
    timer: AtomicPtr<ClockTimer>,
}

impl ClockTrigger {
    fn armed(timer: Arc<ClockTimer>) -> Arc<Self> {
        Arc::new(Self {
            timer: AtomicPtr::new(Arc::into_raw(timer) as *mut ClockTimer),
        })
    }

    #[cfg(test)]
    pub(crate) fn disarmed() -> Arc<Self> {
        Arc::new(Self {
            timer: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Disarm; returns the timer if this call did it
    pub(crate) fn take(&self) -> Option<Arc<ClockTimer>> {
        let timer = self.timer.swap(ptr::null_mut(), Ordering::AcqRel);
        if timer.is_null() {
            None
        } else {
            // SAFETY: produced by `Arc::into_raw` in `armed`, and the swap
            // hands ownership to exactly one caller.
            Some(unsafe { Arc::from_raw(timer) })
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        !self.timer.load(Ordering::Acquire).is_null()
    }
}

impl Drop for ClockTrigger {
    fn drop(&mut self) {
        drop(self.take());
    }
}

/// Binds one timer function to one clock.
pub struct ClockTimer {
    clock: Weak<ClockShared>,
    function: Arc<dyn TimerFunction>,
    /// Current trigger (`Arc::into_raw`), null when nothing is pending
    slot: AtomicPtr<ClockTrigger>,
    this: Weak<ClockTimer>,
}

impl ClockTimer {
    pub(crate) fn bind(clock: &Arc<ClockShared>, function: Arc<dyn TimerFunction>) -> Arc<Self> {
        let timer = Arc::new_cyclic(|this| Self {
            clock: Arc::downgrade(clock),
            function,
            slot: AtomicPtr::new(ptr::null_mut()),
            this: this.clone(),
        });
        if let Some(stateful) = timer.function.as_timer() {
            let context: Arc<dyn TimerContext> = timer.clone();
            stateful.set_timer_context(Arc::downgrade(&context));
        }
        timer
    }

    pub fn function(&self) -> &Arc<dyn TimerFunction> {
        &self.function
    }

    /// Clear the slot if it still holds `trigger`
    pub(crate) fn release(&self, trigger: &Arc<ClockTrigger>) -> bool {
        let raw = Arc::as_ptr(trigger) as *mut ClockTrigger;
        match self
            .slot
            .compare_exchange(raw, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // SAFETY: the slot owned one strong count of `raw`.
                unsafe { drop(Arc::from_raw(raw)) };
                true
            }
            Err(_) => false,
        }
    }

    /// Swap the slot's trigger; returns the previous one
    fn replace(&self, trigger: Option<&Arc<ClockTrigger>>) -> Option<Arc<ClockTrigger>> {
        let raw = trigger.map_or(ptr::null_mut(), |t| {
            Arc::into_raw(Arc::clone(t)) as *mut ClockTrigger
        });
        let old = self.slot.swap(raw, Ordering::AcqRel);
        if old.is_null() {
            None
        } else {
            // SAFETY: the slot owned one strong count of `old`.
            Some(unsafe { Arc::from_raw(old) })
        }
    }
}

impl TimerRef for ClockTimer {
    fn is_scheduled(&self) -> bool {
        !self.slot.load(Ordering::Acquire).is_null()
    }

    fn reschedule(&self, millis: i64) -> StageResult<()> {
        if millis < 0 {
            return Err(StageError::NegativeTimeout(millis));
        }
        let clock = self.clock.upgrade().ok_or(StageError::Stopped)?;
        let this = self.this.upgrade().ok_or(StageError::Stopped)?;
        if let Some(stateful) = self.function.as_timer() {
            stateful.timer_will_schedule(millis);
        }
        clock.start()?;

        let trigger = ClockTrigger::armed(this);
        if let Some(old) = self.replace(Some(&trigger)) {
            drop(old.take());
        }
        let target = clock.target_tick(millis)?;
        clock.insert(target, Arc::clone(&trigger));

        // Stop may have disarmed the dial before this event was linked
        if clock.is_stopped() {
            drop(trigger.take());
            self.release(&trigger);
            return Err(StageError::Stopped);
        }
        Ok(())
    }

    fn cancel(&self) -> bool {
        let prevented = match self.replace(None) {
            Some(old) => old.take().is_some(),
            None => false,
        };
        if prevented {
            if let Some(stateful) = self.function.as_timer() {
                stateful.timer_did_cancel();
            }
        }
        prevented
    }
}

impl TimerContext for ClockTimer {
    fn timer_function(&self) -> Arc<dyn TimerFunction> {
        Arc::clone(&self.function)
    }
}

impl Drop for ClockTimer {
    fn drop(&mut self) {
        let old = *self.slot.get_mut();
        if !old.is_null() {
            // SAFETY: the slot owned one strong count of `old`.
            unsafe { drop(Arc::from_raw(old)) };
        }
    }
}

/// A timer whose deadline elapsed, ready to run.
///
/// [`ClockHooks::run_timer`] decides where `fire` is called: inline on the
/// sweep thread by default, or handed off to a worker pool.
pub struct TimerFiring {
    timer: Arc<ClockTimer>,
    hooks: Arc<dyn ClockHooks>,
}

impl TimerFiring {
    pub(crate) fn new(timer: Arc<ClockTimer>, hooks: Arc<dyn ClockHooks>) -> Self {
        Self { timer, hooks }
    }

    pub fn function(&self) -> &Arc<dyn TimerFunction> {
        &self.timer.function
    }

    /// Run the timer function. A non-fatal panic goes to
    /// `timer_did_fail`; a fatal one propagates.
    pub fn fire(self) {
        let function = &self.timer.function;
        if let Err(error) = catch_non_fatal(|| function.run_timer()) {
            self.hooks.timer_did_fail(function, &error);
        }
    }
}
