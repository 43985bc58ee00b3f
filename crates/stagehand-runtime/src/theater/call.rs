//! Theater-side call completion
//!
//! The first `bind` or `trap` moves the status from zero to
//! `BIND | CUED` or `TRAP | CUED`, stores the result and hands one job to
//! the pool, starting the theater if it has not started yet. That job
//! runs the continuation and sets `DONE`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use stagehand_core::cont::{Call, Cont};
use stagehand_core::error::BoxError;
use stagehand_core::fault::catch_non_fatal;
use stagehand_core::kwarn;
use stagehand_core::spinlock::SpinLock;

use super::TheaterShared;

const BIND: u8 = 1;
const TRAP: u8 = 2;
const CUED: u8 = 4;
const DONE: u8 = 8;

pub struct TheaterCall<T> {
    theater: Arc<TheaterShared>,
    cont: Arc<dyn Cont<T>>,
    status: AtomicU8,
    result: SpinLock<Option<Result<T, BoxError>>>,
    this: Weak<TheaterCall<T>>,
}

impl<T: Send + 'static> TheaterCall<T> {
    pub(crate) fn new(theater: Arc<TheaterShared>, cont: Arc<dyn Cont<T>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            theater,
            cont,
            status: AtomicU8::new(0),
            result: SpinLock::new(None),
            this: this.clone(),
        })
    }

    /// Whether the continuation has run
    pub fn is_done(&self) -> bool {
        self.status.load(Ordering::Acquire) & DONE != 0
    }

    /// Whether `bind` or `trap` has been accepted
    pub fn is_completed(&self) -> bool {
        self.status.load(Ordering::Acquire) & (BIND | TRAP) != 0
    }

    fn complete(&self, flag: u8, result: Result<T, BoxError>) -> bool {
        if self
            .status
            .compare_exchange(0, flag | CUED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.result.lock() = Some(result);

        let this = match self.this.upgrade() {
            Some(this) => this,
            None => return true,
        };
        let job = Box::new({
            let this = Arc::clone(&this);
            move || this.run()
        });
        if let Err(e) = self.theater.submit(job) {
            // The continuation still runs exactly once, on the caller
            kwarn!("call completing inline: {}", e);
            this.run();
        }
        true
    }

    fn run(&self) {
        let result = self.result.lock().take();
        match result {
            Some(Ok(value)) => {
                let cont = &self.cont;
                if let Err(error) = catch_non_fatal(|| cont.bind(value)) {
                    self.trap_cont(Box::new(error));
                }
            }
            Some(Err(error)) => self.trap_cont(error),
            None => {}
        }
        self.status.fetch_or(DONE, Ordering::AcqRel);
    }

    fn trap_cont(&self, error: BoxError) {
        let cont = &self.cont;
        if let Err(failure) = catch_non_fatal(|| cont.trap(error)) {
            self.theater.hooks().call_did_fail(&failure);
        }
    }
}

impl<T: Send + 'static> Call<T> for TheaterCall<T> {
    fn cont(&self) -> &Arc<dyn Cont<T>> {
        &self.cont
    }

    fn try_bind(&self, value: T) -> bool {
        self.complete(BIND, Ok(value))
    }

    fn try_trap(&self, error: BoxError) -> bool {
        self.complete(TRAP, Err(error))
    }
}
