//! Self-rescheduling periodic timer
//!
//! ```text
//!           start            fire
//!   NEW ───────────► RUNNING ◄────► FIRING
//!                       │              │
//!                       └─── stop ─────┴──► STOPPED
//! ```
//!
//! `STOPPED` is terminal. Once `stop()` returns no trigger is running and
//! none will start, except when `stop()` is called from the trigger itself.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};

use crate::error::{StageError, StageResult};
use crate::stage::Schedule;
use crate::timer::{Timer, TimerContext, TimerContextCell, TimerFunction};

const NEW: u8 = 0;
const RUNNING: u8 = 1;
const FIRING: u8 = 2;
const STOPPED: u8 = 3;

type Trigger = Box<dyn Fn(&Recurring) + Send + Sync + 'static>;

/// Invokes `on_trigger` every `period_millis` until stopped.
///
/// A panic from `on_trigger` stops the recurrence and propagates to the
/// schedule, which reports it through its timer failure hook.
pub struct Recurring {
    schedule: Arc<dyn Schedule>,
    period_millis: i64,
    state: AtomicU8,
    context: TimerContextCell,
    on_trigger: Trigger,
    /// Thread running the trigger, if any
    firing: Mutex<Option<ThreadId>>,
    fired: Condvar,
    this: Weak<Recurring>,
}

/// Clears the firing thread when a firing ends, including by unwinding.
/// The next firing may already have claimed the slot on another thread.
struct FiringGuard<'a>(&'a Recurring, ThreadId);

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        let recurring = self.0;
        let mut firing = recurring
            .firing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *firing == Some(self.1) {
            *firing = None;
            recurring.fired.notify_all();
        }
    }
}

impl Recurring {
    pub fn new<F>(schedule: Arc<dyn Schedule>, period_millis: i64, on_trigger: F) -> Arc<Self>
    where
        F: Fn(&Recurring) + Send + Sync + 'static,
    {
        Arc::new_cyclic(|this| Self {
            schedule,
            period_millis,
            state: AtomicU8::new(NEW),
            context: TimerContextCell::new(),
            on_trigger: Box::new(on_trigger),
            firing: Mutex::new(None),
            fired: Condvar::new(),
            this: this.clone(),
        })
    }

    pub fn period_millis(&self) -> i64 {
        self.period_millis
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), RUNNING | FIRING)
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    /// Bind to the schedule and arm the first firing. Idempotent while
    /// running; fails with `Stopped` once stopped.
    pub fn start(&self) -> StageResult<()> {
        match self
            .state
            .compare_exchange(NEW, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(RUNNING) | Err(FIRING) => return Ok(()),
            Err(_) => return Err(StageError::Stopped),
        }

        let this = match self.this.upgrade() {
            Some(this) => this,
            None => {
                self.state.store(STOPPED, Ordering::Release);
                return Err(StageError::Stopped);
            }
        };
        let timer = self.schedule.timer(this);
        if let Err(e) = timer.reschedule(self.period_millis) {
            self.state.store(STOPPED, Ordering::Release);
            return Err(e);
        }
        crate::kdebug!("recurring started, period {}ms", self.period_millis);
        Ok(())
    }

    /// Stop permanently. Returns whether the recurrence was running.
    ///
    /// Blocks until a trigger running on another thread returns.
    pub fn stop(&self) -> bool {
        let previous = self.state.swap(STOPPED, Ordering::AcqRel);
        if previous == FIRING {
            self.await_firing();
        }
        self.context.cancel();
        matches!(previous, RUNNING | FIRING)
    }

    fn await_firing(&self) {
        let me = thread::current().id();
        let mut firing = self.firing.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(id) = *firing {
            if id == me {
                return;
            }
            firing = self
                .fired
                .wait(firing)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl TimerFunction for Recurring {
    fn run_timer(&self) {
        let me = thread::current().id();
        {
            // Claimed under the lock so a stop() that sees FIRING also
            // sees the firing thread
            let mut firing = self.firing.lock().unwrap_or_else(PoisonError::into_inner);
            if self
                .state
                .compare_exchange(RUNNING, FIRING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            *firing = Some(me);
        }
        let _guard = FiringGuard(self, me);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.on_trigger)(self))) {
            self.state.store(STOPPED, Ordering::Release);
            panic::resume_unwind(payload);
        }
        if self.state.load(Ordering::Acquire) != FIRING {
            return;
        }
        if let Err(e) = self.context.reschedule(self.period_millis) {
            crate::kwarn!("recurring reschedule failed: {}", e);
            self.state.store(STOPPED, Ordering::Release);
            return;
        }
        // Fails only if stop() ran meanwhile; it cancels the fire armed
        // above once this firing ends.
        let _ = self
            .state
            .compare_exchange(FIRING, RUNNING, Ordering::AcqRel, Ordering::Acquire);
    }

    fn as_timer(&self) -> Option<&dyn Timer> {
        Some(self)
    }
}

impl Timer for Recurring {
    fn timer_context(&self) -> Option<Arc<dyn TimerContext>> {
        self.context.get()
    }

    fn set_timer_context(&self, context: Weak<dyn TimerContext>) {
        self.context.set(context);
    }
}
