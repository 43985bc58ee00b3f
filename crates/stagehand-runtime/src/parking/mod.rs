//! Thread parking
//!
//! Idle pool workers and the clock's sweep thread sleep here between
//! bursts of work. Platform-specific implementations use the most
//! efficient primitive available.
//!
//! Every wake bumps an epoch before signalling. A parker samples the epoch,
//! then re-checks its `ready` condition, then sleeps only while the epoch
//! is unchanged, so a wake racing with `park` is never lost.

use std::time::Duration;

/// Platform-specific parking mechanism
///
/// Wake sources (job submission, shutdown, clock stop) make their state
/// change visible first and then call `wake_one()` or `wake_all()`.
pub trait WorkerParking: Send + Sync {
    /// Park the current thread until signalled or `timeout`, unless
    /// `ready()` already holds.
    ///
    /// Returns:
    /// - `true` if `ready()` held or the thread was woken by a signal
    /// - `false` on timeout or spurious wakeup
    ///
    /// Callers re-check their condition after returning regardless.
    fn park(&self, ready: &dyn Fn() -> bool, timeout: Option<Duration>) -> bool;

    /// Wake one parked thread
    fn wake_one(&self);

    /// Wake all parked threads
    fn wake_all(&self);

    /// Number of currently parked threads (hint, may be stale)
    fn parked_count(&self) -> usize;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}
