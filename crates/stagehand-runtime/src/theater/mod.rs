//! Theater: worker-pool stage for tasks, calls and timers
//!
//! ```text
//!   Stage::execute ─────────────────────────┐
//!   TaskRef::cue ───► TheaterTask ──────────┤
//!   Call::bind/trap ► TheaterCall ──────────┼──► WorkerPool ──► workers
//!   Schedule::set_timer ► Clock ─► sweep ───┘
//!                             (run_timer hands firings to the pool)
//! ```
//!
//! Starts lazily on first use, whether that is `execute`, `set_timer`, a
//! task cue or a call completion. Stopping is permanent: the clock stops,
//! the pool stops accepting work and drains, and later submissions fail
//! with `Stopped`.

mod call;
mod task;

pub use call::TheaterCall;
pub use task::TheaterTask;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stagehand_core::cont::{Call, Cont};
use stagehand_core::error::{StageError, StageResult};
use stagehand_core::fault::{catch_non_fatal, PanicError};
use stagehand_core::stage::{Job, Schedule, Stage};
use stagehand_core::task::{TaskFunction, TaskRef};
use stagehand_core::timer::{TimerFunction, TimerRef};
use stagehand_core::{kdebug, kerror, kinfo, kwarn};

use crate::clock::{Clock, ClockHooks, TimerFiring};
use crate::config::TheaterConfig;
use crate::pool::WorkerPool;

const STARTED: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle and failure callbacks for a [`Theater`].
///
/// Every failure hook defaults to logging and carrying on.
pub trait TheaterHooks: Send + Sync + 'static {
    fn did_start(&self) {}

    fn did_stop(&self) {}

    /// A job passed to `execute`, or the clock's sweep loop, panicked
    fn did_fail(&self, error: &PanicError) {
        kerror!("theater job failed: {}", error);
    }

    fn task_did_fail(&self, task: &Arc<dyn TaskFunction>, error: &PanicError) {
        let _ = task;
        kerror!("task failed: {}", error);
    }

    /// A continuation's `trap` panicked
    fn call_did_fail(&self, error: &PanicError) {
        kerror!("call failed: {}", error);
    }

    fn timer_did_fail(&self, timer: &Arc<dyn TimerFunction>, error: &PanicError) {
        let _ = timer;
        kerror!("timer failed: {}", error);
    }
}

/// Hooks with every default
pub struct DefaultTheaterHooks;

impl TheaterHooks for DefaultTheaterHooks {}

/// Clock hooks that fire timers on the theater's pool
struct TheaterClockHooks {
    pool: WorkerPool,
    hooks: Arc<dyn TheaterHooks>,
}

impl ClockHooks for TheaterClockHooks {
    fn did_fail(&self, error: &PanicError) {
        self.hooks.did_fail(error);
    }

    fn timer_did_fail(&self, function: &Arc<dyn TimerFunction>, error: &PanicError) {
        self.hooks.timer_did_fail(function, error);
    }

    fn run_timer(&self, firing: TimerFiring) {
        if let Err(e) = self.pool.execute(Box::new(move || firing.fire())) {
            kwarn!("timer dropped: {}", e);
        }
    }
}

/// State shared by a theater and the tasks and calls bound to it, so a
/// first submission from either starts the whole theater
pub(crate) struct TheaterShared {
    name: String,
    pool: WorkerPool,
    clock: Clock,
    hooks: Arc<dyn TheaterHooks>,
    status: AtomicU8,
    shutdown_poll: Duration,
}

impl TheaterShared {
    pub(crate) fn hooks(&self) -> &Arc<dyn TheaterHooks> {
        &self.hooks
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn is_started(&self) -> bool {
        self.status.load(Ordering::Acquire) & STARTED != 0
    }

    fn is_stopped(&self) -> bool {
        self.status.load(Ordering::Acquire) & STOPPED != 0
    }

    fn start(&self) -> StageResult<()> {
        loop {
            let status = self.status.load(Ordering::Acquire);
            if status & STOPPED != 0 {
                return Err(StageError::Stopped);
            }
            if status & STARTED != 0 {
                return Ok(());
            }
            if self
                .status
                .compare_exchange(status, status | STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        self.pool.start()?;
        self.clock.start()?;
        kinfo!(
            "theater {} started: parallelism {}, max threads {}",
            self.name,
            self.pool.parallelism(),
            self.pool.max_threads()
        );
        self.hooks.did_start();
        Ok(())
    }

    fn stop(&self) {
        let previous = self.status.fetch_or(STOPPED, Ordering::AcqRel);
        if previous & STOPPED != 0 {
            return;
        }
        self.clock.stop();
        self.pool.shutdown();
        if !self.pool.is_worker_thread() {
            while !self.pool.await_termination(self.shutdown_poll) {
                kdebug!(
                    "theater {} draining: {} queued, {} live workers",
                    self.name,
                    self.pool.queued(),
                    self.pool.live_workers()
                );
            }
        }
        kinfo!("theater {} stopped", self.name);
        if previous & STARTED != 0 {
            self.hooks.did_stop();
        }
    }

    fn ensure_started(&self) -> StageResult<()> {
        let status = self.status.load(Ordering::Acquire);
        if status & STOPPED != 0 {
            Err(StageError::Stopped)
        } else if status & STARTED == 0 {
            self.start()
        } else {
            Ok(())
        }
    }

    /// Hand a job to the pool, starting the theater on first use
    pub(crate) fn submit(&self, job: Job) -> StageResult<()> {
        self.ensure_started()?;
        self.pool.execute(job).map_err(|_| StageError::Stopped)
    }
}

pub struct Theater {
    shared: Arc<TheaterShared>,
}

impl Theater {
    pub fn new(config: TheaterConfig) -> StageResult<Self> {
        Self::with_hooks(config, Arc::new(DefaultTheaterHooks))
    }

    pub fn with_hooks(config: TheaterConfig, hooks: Arc<dyn TheaterHooks>) -> StageResult<Self> {
        config.validate()?;
        let pool = WorkerPool::new(&config);
        let clock_hooks = Arc::new(TheaterClockHooks {
            pool: pool.clone(),
            hooks: Arc::clone(&hooks),
        });
        let clock = Clock::with_hooks(config.clock.clone(), clock_hooks)?;
        Ok(Self {
            shared: Arc::new(TheaterShared {
                name: config.name,
                pool,
                clock,
                hooks,
                status: AtomicU8::new(0),
                shutdown_poll: config.shutdown_poll,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    pub fn is_started(&self) -> bool {
        self.shared.is_started()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Start the pool and the clock. Idempotent; fails once stopped.
    pub fn start(&self) -> StageResult<()> {
        self.shared.start()
    }

    /// Stop permanently. Waits for queued work to drain unless called from
    /// one of the theater's own workers.
    pub fn stop(&self) {
        self.shared.stop()
    }
}

impl Schedule for Theater {
    fn timer(&self, timer: Arc<dyn TimerFunction>) -> Arc<dyn TimerRef> {
        self.shared.clock.timer(timer)
    }

    fn set_timer(
        &self,
        millis: i64,
        timer: Arc<dyn TimerFunction>,
    ) -> StageResult<Arc<dyn TimerRef>> {
        if millis < 0 {
            return Err(StageError::NegativeTimeout(millis));
        }
        self.shared.ensure_started()?;
        self.shared.clock.set_timer(millis, timer)
    }
}

impl Stage for Theater {
    fn execute(&self, job: Job) -> StageResult<()> {
        let hooks = Arc::clone(&self.shared.hooks);
        self.shared.submit(Box::new(move || {
            if let Err(error) = catch_non_fatal(job) {
                hooks.did_fail(&error);
            }
        }))
    }

    fn task(&self, task: Arc<dyn TaskFunction>) -> Arc<dyn TaskRef> {
        TheaterTask::bind(Arc::clone(&self.shared), task)
    }

    fn call<T: Send + 'static>(&self, cont: Arc<dyn Cont<T>>) -> Arc<dyn Call<T>> {
        TheaterCall::new(Arc::clone(&self.shared), cont)
    }
}

impl Drop for Theater {
    fn drop(&mut self) {
        let shared = &self.shared;
        if shared.status.fetch_or(STOPPED, Ordering::AcqRel) & STOPPED == 0 {
            shared.clock.stop();
            shared.pool.shutdown();
        }
    }
}
