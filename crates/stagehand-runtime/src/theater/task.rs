//! Theater-side task binding
//!
//! ```text
//!            cue                   worker picks up
//!   idle ─────────► CUED ─────────────────────────► RUNNING
//!    ▲                ▲                                │  │
//!    │                └────── cue while running ───────┘  │
//!    │                       (CUED | RUNNING)             │
//!    └──────────────────── run returns, no cue ───────────┘
//! ```
//!
//! At most one pool job is in flight per cue, and a task never runs on
//! two workers at once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use stagehand_core::fault::catch_non_fatal;
use stagehand_core::kwarn;
use stagehand_core::task::{TaskContext, TaskFunction, TaskRef};

use super::TheaterShared;

const CUED: u8 = 1;
const RUNNING: u8 = 2;

/// Binds one task function to one theater.
pub struct TheaterTask {
    theater: Arc<TheaterShared>,
    function: Arc<dyn TaskFunction>,
    status: AtomicU8,
    this: Weak<TheaterTask>,
}

/// Clears `RUNNING` when a run ends, including by unwinding, and
/// resubmits if a cue arrived meanwhile
struct RunGuard<'a>(&'a TheaterTask);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let task = self.0;
        let previous = task.status.fetch_and(!RUNNING, Ordering::AcqRel);
        if previous & CUED != 0 {
            task.submit();
        }
    }
}

impl TheaterTask {
    pub(crate) fn bind(theater: Arc<TheaterShared>, function: Arc<dyn TaskFunction>) -> Arc<Self> {
        let task = Arc::new_cyclic(|this| Self {
            theater,
            function,
            status: AtomicU8::new(0),
            this: this.clone(),
        });
        if let Some(stateful) = task.function.as_task() {
            let context: Arc<dyn TaskContext> = task.clone();
            stateful.set_task_context(Arc::downgrade(&context));
        }
        task
    }

    pub fn function(&self) -> &Arc<dyn TaskFunction> {
        &self.function
    }

    pub fn is_running(&self) -> bool {
        self.status.load(Ordering::Acquire) & RUNNING != 0
    }

    /// Hand one run to the pool, starting the theater if this is its
    /// first use. A rejected submission withdraws the cue.
    fn submit(&self) -> bool {
        let this = match self.this.upgrade() {
            Some(this) => this,
            None => return false,
        };
        match self.theater.submit(Box::new(move || this.run())) {
            Ok(()) => true,
            Err(e) => {
                self.status.fetch_and(!CUED, Ordering::AcqRel);
                kwarn!("task dropped: {}", e);
                false
            }
        }
    }

    fn run(&self) {
        loop {
            let status = self.status.load(Ordering::Acquire);
            // Cancelled, or another job already owns the run
            if status & CUED == 0 || status & RUNNING != 0 {
                return;
            }
            if self
                .status
                .compare_exchange(
                    status,
                    (status | RUNNING) & !CUED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }

        let _guard = RunGuard(self);
        let function = &self.function;
        let result = if function.task_will_block() {
            self.theater
                .pool()
                .managed_block(|| catch_non_fatal(|| function.run_task()))
        } else {
            catch_non_fatal(|| function.run_task())
        };
        if let Err(error) = result {
            self.theater.hooks().task_did_fail(function, &error);
        }
    }
}

impl TaskRef for TheaterTask {
    fn is_cued(&self) -> bool {
        self.status.load(Ordering::Acquire) & CUED != 0
    }

    fn cue(&self) -> bool {
        loop {
            let status = self.status.load(Ordering::Acquire);
            if status & CUED != 0 {
                return false;
            }
            if self
                .status
                .compare_exchange(status, status | CUED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if status & RUNNING != 0 {
                    // The current run resubmits on exit
                    return true;
                }
                if let Some(stateful) = self.function.as_task() {
                    stateful.task_will_cue();
                }
                return self.submit();
            }
        }
    }

    /// Withdraw a cue that has not started running. A re-cue taken while
    /// running is kept.
    fn cancel(&self) -> bool {
        loop {
            let status = self.status.load(Ordering::Acquire);
            if status & CUED == 0 || status & RUNNING != 0 {
                return false;
            }
            if self
                .status
                .compare_exchange(status, status & !CUED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if let Some(stateful) = self.function.as_task() {
                    stateful.task_did_cancel();
                }
                return true;
            }
        }
    }
}

impl TaskContext for TheaterTask {
    fn task_function(&self) -> Arc<dyn TaskFunction> {
        Arc::clone(&self.function)
    }
}
