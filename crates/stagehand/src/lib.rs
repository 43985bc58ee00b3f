//! # stagehand - timers, tasks and continuations on a worker pool
//!
//! A hashed-wheel [`Clock`] fires timers; a [`Theater`] runs sequential
//! tasks, exactly-once continuation calls and fired timers on a pool of
//! worker threads.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stagehand::{task_fn, timer_fn, Runtime, Schedule, Stage, TheaterConfig};
//!
//! fn main() {
//!     let runtime = Runtime::new(TheaterConfig::from_env()).unwrap();
//!
//!     runtime.block_on(|theater| {
//!         // A task never runs concurrently with itself
//!         let task = theater.task(task_fn(|| println!("task ran")));
//!         task.cue();
//!
//!         // Fires on a worker ~50ms from now
//!         theater
//!             .set_timer(50, timer_fn(|| println!("timer fired")))
//!             .unwrap();
//!     });
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        task().cue(), call().bind(), set_timer(), execute()  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Theater                               │
//! │     task status bits, call status bits, lifecycle hooks     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │      │  Worker   │      │   Clock   │
//!    │  Thread   │      │  Thread   │      │   Sweep   │
//!    └───────────┘      └───────────┘      └───────────┘
//!          ▲                   ▲                   │
//!          └───────────────────┴───── firings ─────┘
//! ```

// Re-export core vocabulary
pub use stagehand_core::{
    blocking_task_fn, task_fn, timer_fn, BlockingFnTask, Call, Cont, FnTask, FnTimer, Job,
    Recurring, Schedule, Stage, SyncCont, Task, TaskContext, TaskContextCell, TaskFunction,
    TaskRef, Timer, TimerContext, TimerContextCell, TimerFunction, TimerRef,
};
pub use stagehand_core::conts;

// Re-export errors and failure taxonomy
pub use stagehand_core::{
    catch_non_fatal, is_non_fatal, BoxError, Fatal, PanicError, StageError, StageResult,
    TimeoutError,
};

// Re-export kprint macros for debug logging
pub use stagehand_core::{kdebug, kerror, kinfo, ktrace, kwarn};
pub use stagehand_core::kprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export env utilities
pub use stagehand_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_key};

// Re-export runtime types
pub use stagehand_runtime::{
    Clock, ClockConfig, ClockHooks, DefaultClockHooks, DefaultTheaterHooks, Theater,
    TheaterConfig, TheaterHooks, TimerFiring, WorkerPool,
};

use std::sync::Arc;

/// Owns one theater for the life of an application
///
/// The theater starts lazily; `block_on` starts it eagerly, runs the
/// closure, then stops it and waits for queued work to drain.
pub struct Runtime {
    theater: Arc<Theater>,
}

impl Runtime {
    /// Create a runtime; no threads are spawned yet
    pub fn new(config: TheaterConfig) -> StageResult<Self> {
        init_logging();
        Ok(Self {
            theater: Arc::new(Theater::new(config)?),
        })
    }

    /// Create a runtime with custom failure and lifecycle hooks
    pub fn with_hooks(config: TheaterConfig, hooks: Arc<dyn TheaterHooks>) -> StageResult<Self> {
        init_logging();
        Ok(Self {
            theater: Arc::new(Theater::with_hooks(config, hooks)?),
        })
    }

    pub fn theater(&self) -> &Arc<Theater> {
        &self.theater
    }

    pub fn start(&self) -> StageResult<()> {
        self.theater.start()
    }

    /// Run `f` with the theater active, then shut down
    ///
    /// This is the typical entry point for applications.
    pub fn block_on<F, T>(&self, f: F) -> StageResult<T>
    where
        F: FnOnce(&Arc<Theater>) -> T,
    {
        self.theater.start()?;
        let result = f(&self.theater);
        self.theater.stop();
        Ok(result)
    }

    /// Stop the theater permanently
    pub fn shutdown(&self) {
        self.theater.stop();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
