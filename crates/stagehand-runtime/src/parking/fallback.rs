//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support.
//! Less efficient but portable.

use super::WorkerParking;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Condvar-based parking (fallback)
pub struct FallbackParking {
    /// Wake epoch, bumped under the lock by every wake
    epoch: Mutex<u64>,

    condvar: Condvar,

    /// Count of parked threads
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    fn bump(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch = epoch.wrapping_add(1);
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn park(&self, ready: &dyn Fn() -> bool, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        let guard = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        let sampled = *guard;
        if ready() {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let (guard, woken) = match timeout {
            Some(t) => {
                let (g, result) = self
                    .condvar
                    .wait_timeout_while(guard, t, |epoch| *epoch == sampled)
                    .unwrap_or_else(PoisonError::into_inner);
                (g, !result.timed_out())
            }
            None => {
                let g = self
                    .condvar
                    .wait_while(guard, |epoch| *epoch == sampled)
                    .unwrap_or_else(PoisonError::into_inner);
                (g, true)
            }
        };
        drop(guard);

        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        self.bump();
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        self.bump();
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
