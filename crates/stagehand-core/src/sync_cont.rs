//! A continuation a thread can block on

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::cont::Cont;
use crate::error::{BoxError, TimeoutError};

/// Captures the first value or error it receives and wakes waiters.
/// Later completions are ignored.
pub struct SyncCont<T> {
    result: Mutex<Option<Result<T, BoxError>>>,
    ready: Condvar,
}

impl<T> SyncCont<T> {
    pub fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: Result<T, BoxError>) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(result);
            self.ready.notify_all();
        }
    }

    pub fn is_done(&self) -> bool {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Wait for the result and take it. A timeout yields a `TimeoutError`.
    pub fn await_result(&self, timeout: Duration) -> Result<T, BoxError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Box::new(TimeoutError));
            }
            let (guard, _) = self
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }
}

impl<T> Default for SyncCont<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Cont<T> for SyncCont<T> {
    fn bind(&self, value: T) {
        self.complete(Ok(value));
    }

    fn trap(&self, error: BoxError) {
        self.complete(Err(error));
    }
}
