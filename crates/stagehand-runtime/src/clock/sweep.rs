//! Sweep thread
//!
//! Single thread that advances the clock's tick and executes one bucket per
//! tick:
//! 1. Sleeps until `origin + tick * tick_nanos` (interruptible by stop)
//! 2. Appends the sentinel for the bucket's next revolution
//! 3. Fires due events and carries armed future events past the sentinel
//! 4. Publishes the sentinel as the bucket's new head
//!
//! A failure in the loop itself stops the clock for good.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use stagehand_core::fault::{is_non_fatal, PanicError};
use stagehand_core::{kdebug, kerror};

use super::queue::ClockEvent;
use super::timer::TimerFiring;
use super::{ClockShared, STOPPED};

/// Marks the clock stopped and releases `stop()` waiters on exit,
/// including exit by unwinding
struct ExitGuard<'a>(&'a ClockShared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let clock = self.0;
        clock.status.fetch_or(STOPPED, Ordering::AcqRel);
        clock.disarm_all();
        clock.stop_latch.count_down();
    }
}

/// Sweep thread entry point
pub(super) fn run(clock: Arc<ClockShared>) {
    let _ = clock.sweep_thread.set(thread::current().id());
    let origin = Instant::now();
    let _ = clock.origin.set(origin);
    clock.start_latch.count_down();

    let guard = ExitGuard(&clock);
    kdebug!(
        "clock {} started: {} buckets x {}ns",
        clock.name,
        clock.tick_count,
        clock.tick_nanos
    );
    clock.hooks.did_start();

    match panic::catch_unwind(AssertUnwindSafe(|| clock.sweep_loop(origin))) {
        Ok(()) => {
            drop(guard);
            kdebug!("clock {} stopped at tick {}", clock.name, clock.tick.load(Ordering::Relaxed));
            clock.hooks.did_stop();
        }
        Err(payload) => {
            clock.status.fetch_or(STOPPED, Ordering::AcqRel);
            if is_non_fatal(&*payload) {
                drop(guard);
                let error = PanicError::from_payload(&*payload);
                kerror!("clock {} sweep failed: {}", clock.name, error);
                clock.hooks.did_fail(&error);
            } else {
                drop(guard);
                panic::resume_unwind(payload);
            }
        }
    }
}

impl ClockShared {
    fn sweep_loop(&self, origin: Instant) {
        let mut tick: u64 = 0;
        loop {
            let due = Duration::from_nanos(tick.saturating_mul(self.tick_nanos));
            loop {
                if self.is_stopped() {
                    return;
                }
                let elapsed = origin.elapsed();
                if elapsed >= due {
                    break;
                }
                self.parking.park(&|| self.is_stopped(), Some(due - elapsed));
            }

            self.sweep(tick);
            self.tick.store(tick, Ordering::Release);
            tick += 1;
        }
    }

    /// Execute bucket `tick & mask`
    fn sweep(&self, tick: u64) {
        let queue = &self.dial[(tick & self.mask) as usize];
        let sentinel = match queue.push(ClockEvent::sentinel(tick + self.tick_count)) {
            Ok(sentinel) => sentinel,
            // Sentinels are never rejected
            Err(_) => return,
        };

        queue.drain_to(sentinel, |event| {
            let trigger = match &event.trigger {
                Some(trigger) => trigger,
                None => return,
            };
            if event.target_tick <= tick {
                if let Some(timer) = trigger.take() {
                    timer.release(trigger);
                    self.hooks
                        .run_timer(TimerFiring::new(timer, Arc::clone(&self.hooks)));
                }
            } else if trigger.is_armed() {
                self.insert(event.target_tick, Arc::clone(trigger));
            }
        });
    }

    /// Disarm every pending event so the dial stops holding timers alive
    pub(super) fn disarm_all(&self) {
        let mut disarmed = 0usize;
        for queue in self.dial.iter() {
            queue.for_each(|event| {
                if let Some(trigger) = &event.trigger {
                    if let Some(timer) = trigger.take() {
                        timer.release(trigger);
                        disarmed += 1;
                    }
                }
            });
        }
        if disarmed > 0 {
            kdebug!("clock {} disarmed {} pending timers", self.name, disarmed);
        }
    }
}
