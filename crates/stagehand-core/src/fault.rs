//! Failure taxonomy for user callbacks
//!
//! Callbacks (timers, tasks, continuations) report failure by panicking.
//! Every panic is caught at the callback boundary and classified:
//!
//! - **non-fatal**: any ordinary panic. Converted to a [`PanicError`] and
//!   handed to the owning engine's failure hook; other callbacks keep running.
//! - **fatal**: a panic whose payload is [`Fatal`]. Never swallowed: the
//!   engine re-raises it with `resume_unwind`, terminating the thread that
//!   hit it.

use core::fmt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Panic payload type
pub type Payload = Box<dyn Any + Send + 'static>;

/// Marker payload for failures that must terminate the current thread
#[derive(Debug, Clone)]
pub struct Fatal {
    reason: String,
}

impl Fatal {
    /// Panic with a fatal payload
    pub fn raise(reason: impl Into<String>) -> ! {
        panic::panic_any(Fatal { reason: reason.into() })
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal: {}", self.reason)
    }
}

/// Whether a caught panic may be reported and recovered from
#[inline]
pub fn is_non_fatal(payload: &(dyn Any + Send)) -> bool {
    !payload.is::<Fatal>()
}

/// A non-fatal panic converted into an error value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Extract the panic message from a payload
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(fatal) = payload.downcast_ref::<Fatal>() {
            fatal.to_string()
        } else {
            "opaque panic payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback panicked: {}", self.message)
    }
}

impl std::error::Error for PanicError {}

/// Run `f`, catching non-fatal panics.
///
/// Fatal panics are re-raised immediately and never reach the caller's
/// error branch.
pub fn catch_non_fatal<R>(f: impl FnOnce() -> R) -> Result<R, PanicError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => {
            if is_non_fatal(&*payload) {
                Err(PanicError::from_payload(&*payload))
            } else {
                panic::resume_unwind(payload)
            }
        }
    }
}
