//! Continuations and one-shot calls
//!
//! A [`Cont`] is "what happens next" once an asynchronous operation yields a
//! value or an error. A [`Call`] is the exactly-once completion handle a
//! stage hands out for a continuation: the first `bind` or `trap` wins and
//! every later attempt is rejected.

use std::sync::Arc;

use crate::error::{BoxError, StageError, StageResult};

/// Continuation receiving either a value or an error
pub trait Cont<T>: Send + Sync {
    fn bind(&self, value: T);

    fn trap(&self, error: BoxError);
}

/// Exactly-once completion handle for a continuation
pub trait Call<T>: Send + Sync {
    /// The continuation this call completes
    fn cont(&self) -> &Arc<dyn Cont<T>>;

    /// Complete with a value; returns false if already completed
    fn try_bind(&self, value: T) -> bool;

    /// Complete with an error; returns false if already completed
    fn try_trap(&self, error: BoxError) -> bool;

    fn bind(&self, value: T) -> StageResult<()> {
        if self.try_bind(value) {
            Ok(())
        } else {
            Err(StageError::AlreadyCompleted)
        }
    }

    fn trap(&self, error: BoxError) -> StageResult<()> {
        if self.try_trap(error) {
            Ok(())
        } else {
            Err(StageError::AlreadyCompleted)
        }
    }
}
