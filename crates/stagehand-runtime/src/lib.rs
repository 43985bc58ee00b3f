//! # stagehand-runtime
//!
//! Threaded implementation of the stagehand scheduling core.
//!
//! This crate provides:
//! - [`Clock`]: hashed-wheel timer scheduler with one sweep thread
//! - [`Theater`]: worker-pool stage running tasks, calls and timers
//! - [`WorkerPool`]: MPMC job pool with managed blocking
//! - Worker parking (futex on Linux, condvar elsewhere)
//! - Environment-driven configuration

pub mod clock;
pub mod config;
pub mod parking;
pub mod pool;
pub mod theater;

// Re-exports
pub use clock::{Clock, ClockHooks, ClockTimer, DefaultClockHooks, TimerFiring};
pub use config::{ClockConfig, TheaterConfig};
pub use parking::{new_parking, WorkerParking};
pub use pool::WorkerPool;
pub use theater::{DefaultTheaterHooks, Theater, TheaterCall, TheaterHooks, TheaterTask};
