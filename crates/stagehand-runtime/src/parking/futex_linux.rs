//! Linux futex-based parking
//!
//! Futex word semantics: a wake epoch. Wakers increment it before
//! `FUTEX_WAKE`; a parker waits only while the word still holds the epoch
//! it sampled before checking `ready`.
//!
//! When a thread parks:
//! 1. Increment parked count
//! 2. Sample the epoch, then check `ready`
//! 3. FUTEX_WAIT on the sampled epoch
//! 4. Decrement parked count on return
//!
//! When waking:
//! 1. Increment the epoch
//! 2. FUTEX_WAKE N waiters, skipped when nobody is parked

use super::WorkerParking;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Linux futex-based parking
pub struct FutexParking {
    /// Wake epoch
    futex: AtomicU32,

    /// Count of parked threads
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn wake(&self, count: i32) {
        self.futex.fetch_add(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) == 0 {
            return;
        }

        // SAFETY: the futex word lives as long as `self`; FUTEX_WAKE does
        // not read the timeout or second address.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn park(&self, ready: &dyn Fn() -> bool, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        let epoch = self.futex.load(Ordering::SeqCst);
        if ready() {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // SAFETY: the futex word and the timespec outlive the syscall.
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                epoch,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };

        self.parked.fetch_sub(1, Ordering::SeqCst);

        if result == 0 {
            true
        } else {
            // EAGAIN: the epoch moved before we slept, which is a wake
            let errno = unsafe { *libc::__errno_location() };
            errno == libc::EAGAIN
        }
    }

    fn wake_one(&self) {
        self.wake(1);
    }

    fn wake_all(&self) {
        self.wake(i32::MAX);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
