//! # stagehand-core
//!
//! Vocabulary types for the stagehand timer wheel and task/call engine.
//!
//! This crate is platform-agnostic and spawns no threads of its own.
//! The engines (`Clock`, `Theater`) live in `stagehand-runtime`.
//!
//! ## Modules
//!
//! - `cont` - Continuations (`Cont`) and one-shot completion handles (`Call`)
//! - `conts` - Continuation combinators
//! - `sync_cont` - A continuation a thread can block on
//! - `timer` - Timer functions, contexts and references
//! - `task` - Task functions, contexts and references
//! - `stage` - `Schedule` and `Stage` execution contexts
//! - `recurring` - Self-rescheduling periodic timer
//! - `error` - Error types
//! - `fault` - Fatal/non-fatal classification of callback panics
//! - `spinlock` - Internal spinlock primitive
//! - `latch` - Countdown latch for start/stop handshakes
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod cont;
pub mod conts;
pub mod sync_cont;
pub mod timer;
pub mod task;
pub mod stage;
pub mod recurring;
pub mod error;
pub mod fault;
pub mod spinlock;
pub mod latch;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use cont::{Call, Cont};
pub use sync_cont::SyncCont;
pub use timer::{timer_fn, FnTimer, Timer, TimerContext, TimerContextCell, TimerFunction, TimerRef};
pub use task::{
    blocking_task_fn, task_fn, BlockingFnTask, FnTask, Task, TaskContext, TaskContextCell,
    TaskFunction, TaskRef,
};
pub use stage::{Job, Schedule, Stage};
pub use recurring::Recurring;
pub use error::{BoxError, StageError, StageResult, TimeoutError};
pub use fault::{catch_non_fatal, is_non_fatal, Fatal, PanicError, Payload};
pub use spinlock::SpinLock;
pub use latch::Latch;
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_key};
