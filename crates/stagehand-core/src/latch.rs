//! One-shot countdown latch
//!
//! The clock's start and stop handshakes block callers until the sweep
//! thread has recorded its start time (or exited). These are the only
//! blocking synchronization points besides the pool's termination wait.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct Latch {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    /// Decrement the count; at zero every waiter is released
    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.condvar.notify_all();
            }
        }
    }

    pub fn is_open(&self) -> bool {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) == 0
    }

    /// Block until the count reaches zero
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .condvar
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the count reaches zero or `timeout` elapses.
    /// Returns whether the latch opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .condvar
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        true
    }
}
