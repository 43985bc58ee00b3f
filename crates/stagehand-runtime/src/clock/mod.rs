//! Hashed-wheel clock
//!
//! A dial of `tick_count` buckets (a power of two) swept by one dedicated
//! thread every `tick_millis`. A timer due at tick `t` lives in bucket
//! `t & (tick_count - 1)`; events for later revolutions stay queued and are
//! carried forward by each sweep of their bucket.
//!
//! # Architecture
//!
//! ```text
//!   any thread                         sweep thread
//!   ──────────                         ────────────
//!   TimerRef::reschedule               park until origin + tick * tick_nanos
//!        │                                   │
//!        ▼                                   ▼
//!   target = ceil(deadline / tick)     append sentinel(tick + tick_count)
//!        │                                   │
//!        ▼                                   ▼
//!   ClockQueue::push ───────────►  dial[tick & mask] ──► fire due events
//!   (retry at target + 1 if the            │            carry future ones
//!    bucket was already swept)             ▼
//!                                   ClockHooks::run_timer(TimerFiring)
//! ```
//!
//! Insertion is lock-free. Firing and cancelling race on the event's
//! trigger; exactly one wins.

mod queue;
mod sweep;
mod timer;

pub use timer::{ClockTimer, TimerFiring};

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use stagehand_core::error::{StageError, StageResult};
use stagehand_core::fault::PanicError;
use stagehand_core::latch::Latch;
use stagehand_core::spinlock::SpinLock;
use stagehand_core::stage::Schedule;
use stagehand_core::timer::{TimerFunction, TimerRef};
use stagehand_core::{kdebug, kerror};

use crate::config::ClockConfig;
use crate::parking::{new_parking, WorkerParking};

use queue::{ClockEvent, ClockQueue};
use timer::ClockTrigger;

const STARTED: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle and failure callbacks for a [`Clock`].
///
/// The defaults log failures and fire timers inline on the sweep thread.
pub trait ClockHooks: Send + Sync + 'static {
    fn did_start(&self) {}

    fn did_stop(&self) {}

    /// The sweep loop itself failed; the clock is now stopped
    fn did_fail(&self, error: &PanicError) {
        kerror!("clock failed: {}", error);
    }

    /// A timer function panicked
    fn timer_did_fail(&self, function: &Arc<dyn TimerFunction>, error: &PanicError) {
        let _ = function;
        kerror!("timer failed: {}", error);
    }

    /// Run a due timer. Called on the sweep thread.
    fn run_timer(&self, firing: TimerFiring) {
        firing.fire();
    }
}

/// Hooks with every default
pub struct DefaultClockHooks;

impl ClockHooks for DefaultClockHooks {}

/// State shared by the clock handle, its timers and the sweep thread.
pub(crate) struct ClockShared {
    name: String,
    tick_nanos: u64,
    tick_count: u64,
    mask: u64,
    dial: Box<[ClockQueue]>,

    status: AtomicU8,
    /// Last executed tick
    tick: AtomicU64,
    origin: OnceLock<Instant>,
    start_latch: Latch,
    stop_latch: Latch,
    parking: Box<dyn WorkerParking>,
    hooks: Arc<dyn ClockHooks>,
    thread: SpinLock<Option<JoinHandle<()>>>,
    sweep_thread: OnceLock<ThreadId>,
}

impl ClockShared {
    fn new(config: &ClockConfig, hooks: Arc<dyn ClockHooks>) -> Self {
        let tick_count = config.effective_tick_count() as u64;
        let dial = (0..tick_count).map(ClockQueue::new).collect();
        Self {
            name: config.name.clone(),
            tick_nanos: config.tick_nanos(),
            tick_count,
            mask: tick_count - 1,
            dial,
            status: AtomicU8::new(0),
            tick: AtomicU64::new(0),
            origin: OnceLock::new(),
            start_latch: Latch::new(1),
            stop_latch: Latch::new(1),
            parking: new_parking(),
            hooks,
            thread: SpinLock::new(None),
            sweep_thread: OnceLock::new(),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.status.load(Ordering::Acquire) & STOPPED != 0
    }

    fn is_started(&self) -> bool {
        self.status.load(Ordering::Acquire) & STARTED != 0
    }

    /// Spawn the sweep thread once and wait until it has recorded the
    /// clock's origin. Fails once stopped.
    pub(crate) fn start(self: &Arc<Self>) -> StageResult<()> {
        loop {
            let status = self.status.load(Ordering::Acquire);
            if status & STOPPED != 0 {
                return Err(StageError::Stopped);
            }
            if status & STARTED != 0 {
                break;
            }
            if self
                .status
                .compare_exchange(status, status | STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let shared = Arc::clone(self);
                let spawned = thread::Builder::new()
                    .name(self.name.clone())
                    .spawn(move || sweep::run(shared));
                match spawned {
                    Ok(handle) => *self.thread.lock() = Some(handle),
                    Err(e) => {
                        kerror!("clock {} failed to spawn sweep thread: {}", self.name, e);
                        self.status.fetch_or(STOPPED, Ordering::AcqRel);
                        self.start_latch.count_down();
                        self.stop_latch.count_down();
                        return Err(StageError::SpawnFailed);
                    }
                }
                break;
            }
        }
        self.start_latch.wait();
        Ok(())
    }

    /// Stop permanently and wait for the sweep thread to exit, unless
    /// called from the sweep thread itself.
    pub(crate) fn stop(&self) {
        let previous = self.status.fetch_or(STOPPED, Ordering::AcqRel);
        if previous & STARTED == 0 {
            if previous & STOPPED == 0 {
                // Never started: release anyone racing on the latches
                self.start_latch.count_down();
                self.stop_latch.count_down();
                kdebug!("clock {} stopped before start", self.name);
            }
            return;
        }

        self.parking.wake_all();
        if self.sweep_thread.get() == Some(&thread::current().id()) {
            return;
        }
        let handle = self.thread.lock().take();
        match handle {
            Some(handle) => {
                let _ = handle.join();
            }
            None => self.stop_latch.wait(),
        }
    }

    /// Tick at which a timer scheduled now for `millis` must fire
    pub(crate) fn target_tick(&self, millis: i64) -> StageResult<u64> {
        let origin = self.origin.get().ok_or(StageError::Stopped)?;
        let deadline = origin.elapsed().as_nanos() + millis as u128 * 1_000_000;
        let tick_nanos = self.tick_nanos as u128;
        Ok(((deadline + tick_nanos - 1) / tick_nanos) as u64)
    }

    /// Link an event, retrying one tick later each time the sweep thread
    /// has already passed the target bucket
    pub(crate) fn insert(&self, target_tick: u64, trigger: Arc<ClockTrigger>) {
        let mut event = ClockEvent::event(target_tick, trigger);
        loop {
            let queue = &self.dial[(event.target_tick & self.mask) as usize];
            match queue.push(event) {
                Ok(_) => return,
                Err(rejected) => {
                    event = rejected;
                    event.target_tick += 1;
                }
            }
        }
    }

    pub(crate) fn timer(self: &Arc<Self>, function: Arc<dyn TimerFunction>) -> Arc<ClockTimer> {
        ClockTimer::bind(self, function)
    }
}

/// Hashed-wheel timer scheduler.
///
/// Starts lazily on the first scheduled timer. Stopping is permanent;
/// dropping the clock stops it.
pub struct Clock {
    shared: Arc<ClockShared>,
}

impl Clock {
    pub fn new(config: ClockConfig) -> StageResult<Self> {
        Self::with_hooks(config, Arc::new(DefaultClockHooks))
    }

    pub fn with_hooks(config: ClockConfig, hooks: Arc<dyn ClockHooks>) -> StageResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(ClockShared::new(&config, hooks)),
        })
    }

    pub fn start(&self) -> StageResult<()> {
        self.shared.start()
    }

    pub fn stop(&self) {
        self.shared.stop()
    }

    pub fn is_started(&self) -> bool {
        self.shared.is_started()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Last tick the sweep thread executed
    pub fn tick(&self) -> u64 {
        self.shared.tick.load(Ordering::Acquire)
    }

    pub fn tick_millis(&self) -> u64 {
        self.shared.tick_nanos / 1_000_000
    }

    pub fn tick_count(&self) -> usize {
        self.shared.tick_count as usize
    }
}

impl Schedule for Clock {
    fn timer(&self, function: Arc<dyn TimerFunction>) -> Arc<dyn TimerRef> {
        self.shared.timer(function)
    }

    fn set_timer(
        &self,
        millis: i64,
        function: Arc<dyn TimerFunction>,
    ) -> StageResult<Arc<dyn TimerRef>> {
        if millis < 0 {
            return Err(StageError::NegativeTimeout(millis));
        }
        let timer = self.shared.timer(function);
        timer.reschedule(millis)?;
        Ok(timer)
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{Mutex, Weak};
    use std::time::Duration;

    use stagehand_core::fault::Fatal;
    use stagehand_core::timer::{timer_fn, Timer, TimerContext, TimerContextCell};

    fn clock(tick_millis: u64, tick_count: usize) -> Clock {
        Clock::new(
            ClockConfig::new()
                .name("clock-test")
                .tick_millis(tick_millis)
                .tick_count(tick_count),
        )
        .unwrap()
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn TimerFunction>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (
            hits,
            timer_fn(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[derive(Default)]
    struct RecordingHooks {
        started: AtomicUsize,
        stopped: AtomicUsize,
        failed: AtomicUsize,
        timer_failures: Mutex<Vec<String>>,
    }

    impl ClockHooks for RecordingHooks {
        fn did_start(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn did_stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn did_fail(&self, _error: &PanicError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn timer_did_fail(&self, _function: &Arc<dyn TimerFunction>, error: &PanicError) {
            self.timer_failures
                .lock()
                .unwrap()
                .push(error.message().to_string());
        }
    }

    #[test]
    fn test_rounds_tick_count() {
        let clock = clock(10, 60);
        assert_eq!(clock.tick_count(), 64);
        assert_eq!(clock.tick_millis(), 10);
        assert!(!clock.is_started());
    }

    #[test]
    fn test_invalid_config() {
        assert!(Clock::new(ClockConfig::new().tick_millis(0)).is_err());
    }

    #[test]
    fn test_fires_no_earlier_than_deadline() {
        let clock = clock(10, 64);
        let fired_at = Arc::new(Mutex::new(None));
        let f = Arc::clone(&fired_at);
        let scheduled = Instant::now();
        clock
            .set_timer(
                50,
                timer_fn(move || {
                    *f.lock().unwrap() = Some(Instant::now());
                }),
            )
            .unwrap();
        assert!(clock.is_started());

        assert!(wait_until(Duration::from_secs(5), || fired_at.lock().unwrap().is_some()));
        let fired = fired_at.lock().unwrap().unwrap();
        assert!(fired.duration_since(scheduled) >= Duration::from_millis(50));
    }

    #[test]
    fn test_zero_delay_fires() {
        let clock = clock(10, 64);
        let (hits, function) = counter();
        let timer = clock.set_timer(0, function).unwrap();
        assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 1));
        assert!(!timer.is_scheduled());
    }

    #[test]
    fn test_negative_timeout() {
        let clock = clock(10, 64);
        let (_, function) = counter();
        assert_eq!(
            clock.set_timer(-1, Arc::clone(&function)).err(),
            Some(StageError::NegativeTimeout(-1))
        );
        let timer = clock.timer(function);
        assert_eq!(timer.reschedule(-5), Err(StageError::NegativeTimeout(-5)));
        assert!(!timer.is_scheduled());
    }

    #[test]
    fn test_cancel_before_fire() {
        let clock = clock(10, 64);
        let (hits, function) = counter();
        let timer = clock.set_timer(100, function).unwrap();
        assert!(timer.is_scheduled());
        assert!(timer.cancel());
        assert!(!timer.is_scheduled());
        assert!(!timer.cancel());

        thread::sleep(Duration::from_millis(250));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_after_fire() {
        let clock = clock(10, 64);
        let (hits, function) = counter();
        let timer = clock.set_timer(10, function).unwrap();
        assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 1));
        assert!(!timer.cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reschedule_replaces_pending_fire() {
        let clock = clock(10, 64);
        let (hits, function) = counter();
        let scheduled = Instant::now();
        let timer = clock.set_timer(30, function).unwrap();
        timer.reschedule(120).unwrap();
        timer.reschedule(80).unwrap();

        assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 1));
        assert!(scheduled.elapsed() >= Duration::from_millis(80));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_later_revolution() {
        // 4 buckets of 10ms: a 100ms timer waits out two full revolutions
        let clock = clock(10, 4);
        let (hits, function) = counter();
        let scheduled = Instant::now();
        clock.set_timer(100, function).unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 1));
        assert!(scheduled.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_thousand_timers() {
        const TICK: u64 = 10;
        let clock = clock(TICK, 64);
        let fired: Arc<Mutex<Vec<(usize, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut deadlines = Vec::with_capacity(1000);
        for i in 0..1000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let delay = (seed % 501) as i64;
            let fired = Arc::clone(&fired);
            let scheduled = Instant::now();
            clock
                .set_timer(
                    delay,
                    timer_fn(move || fired.lock().unwrap().push((i, Instant::now()))),
                )
                .unwrap();
            deadlines.push(scheduled + Duration::from_millis(delay as u64));
        }

        assert!(wait_until(Duration::from_secs(10), || fired.lock().unwrap().len() == 1000));
        let fired = fired.lock().unwrap();

        let mut seen = vec![false; 1000];
        let mut latest_deadline = None::<Instant>;
        for &(i, at) in fired.iter() {
            assert!(!seen[i], "timer {} fired twice", i);
            seen[i] = true;
            assert!(at >= deadlines[i], "timer {} fired early", i);
            // Generous bound for loaded test machines
            assert!(at.duration_since(deadlines[i]) < Duration::from_millis(TICK + 250));

            // Firing order follows target ticks, up to one tick of rounding,
            // one tick of insertion retry and measurement skew
            if let Some(latest) = latest_deadline {
                assert!(deadlines[i] + Duration::from_millis(3 * TICK) >= latest);
            }
            latest_deadline = Some(latest_deadline.map_or(deadlines[i], |l| l.max(deadlines[i])));
        }
    }

    #[test]
    fn test_concurrent_producers() {
        let clock = Arc::new(clock(5, 16));
        let hits = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let clock = Arc::clone(&clock);
                let hits = Arc::clone(&hits);
                thread::spawn(move || {
                    for i in 0..200 {
                        let hits = Arc::clone(&hits);
                        clock
                            .set_timer(
                                ((t * 7 + i) % 60) as i64,
                                timer_fn(move || {
                                    hits.fetch_add(1, Ordering::SeqCst);
                                }),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(wait_until(Duration::from_secs(10), || hits.load(Ordering::SeqCst) == 1600));
    }

    #[test]
    fn test_failing_timer_reported_once() {
        let hooks = Arc::new(RecordingHooks::default());
        let clock = Clock::with_hooks(
            ClockConfig::new().name("clock-fail").tick_millis(10).tick_count(64),
            hooks.clone(),
        )
        .unwrap();

        clock
            .set_timer(10, timer_fn(|| panic!("timer exploded")))
            .unwrap();
        let (hits, function) = counter();
        clock.set_timer(40, Arc::clone(&function)).unwrap();
        clock.set_timer(80, function).unwrap();

        assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 2));
        assert_eq!(
            *hooks.timer_failures.lock().unwrap(),
            vec!["timer exploded".to_string()]
        );
        assert_eq!(hooks.failed.load(Ordering::SeqCst), 0);
        assert!(!clock.is_stopped());

        clock.stop();
        assert_eq!(hooks.started.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_is_permanent() {
        let clock = clock(10, 64);
        clock.start().unwrap();
        clock.start().unwrap();
        clock.stop();
        clock.stop();
        assert!(clock.is_stopped());
        assert_eq!(clock.start(), Err(StageError::Stopped));

        let (_, function) = counter();
        assert_eq!(clock.set_timer(10, function).err(), Some(StageError::Stopped));
    }

    #[test]
    fn test_stop_before_start() {
        let clock = clock(10, 64);
        clock.stop();
        assert!(clock.is_stopped());
        assert_eq!(clock.start(), Err(StageError::Stopped));
    }

    #[test]
    fn test_stop_releases_pending_timers() {
        let (hits, function) = counter();
        let timer = {
            let clock = clock(10, 64);
            let timer = clock.set_timer(10_000, Arc::clone(&function)).unwrap();
            assert!(timer.is_scheduled());
            clock.stop();
            assert!(!timer.is_scheduled());
            timer
        };
        drop(timer);
        assert_eq!(Arc::strong_count(&function), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_from_timer() {
        let clock = Arc::new(clock(10, 64));
        let weak = Arc::downgrade(&clock);
        let stopped = Arc::new(AtomicBool::new(false));
        let s = Arc::clone(&stopped);
        clock
            .set_timer(
                10,
                timer_fn(move || {
                    if let Some(clock) = weak.upgrade() {
                        clock.stop();
                        s.store(true, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
        assert!(wait_until(Duration::from_secs(5), || stopped.load(Ordering::SeqCst)));
        assert!(clock.is_stopped());
    }

    #[test]
    fn test_fatal_timer_stops_clock() {
        let hooks = Arc::new(RecordingHooks::default());
        let clock = Clock::with_hooks(
            ClockConfig::new().name("clock-fatal").tick_millis(10).tick_count(8),
            hooks.clone(),
        )
        .unwrap();
        clock
            .set_timer(10, timer_fn(|| Fatal::raise("unrecoverable")))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || clock.is_stopped()));
        assert_eq!(clock.start(), Err(StageError::Stopped));
        assert!(hooks.timer_failures.lock().unwrap().is_empty());
        assert_eq!(hooks.failed.load(Ordering::SeqCst), 0);
    }

    /// Reschedules itself a fixed number of times
    struct Countdown {
        remaining: AtomicUsize,
        fired: AtomicUsize,
        will_schedule: AtomicUsize,
        did_cancel: AtomicUsize,
        context: TimerContextCell,
    }

    impl Countdown {
        fn new(remaining: usize) -> Arc<Self> {
            Arc::new(Self {
                remaining: AtomicUsize::new(remaining),
                fired: AtomicUsize::new(0),
                will_schedule: AtomicUsize::new(0),
                did_cancel: AtomicUsize::new(0),
                context: TimerContextCell::new(),
            })
        }
    }

    impl TimerFunction for Countdown {
        fn run_timer(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
            if self.remaining.fetch_sub(1, Ordering::SeqCst) > 1 {
                self.context.reschedule(10).unwrap();
            }
        }

        fn as_timer(&self) -> Option<&dyn Timer> {
            Some(self)
        }
    }

    impl Timer for Countdown {
        fn timer_context(&self) -> Option<Arc<dyn TimerContext>> {
            self.context.get()
        }

        fn set_timer_context(&self, context: Weak<dyn TimerContext>) {
            self.context.set(context);
        }

        fn timer_will_schedule(&self, _millis: i64) {
            self.will_schedule.fetch_add(1, Ordering::SeqCst);
        }

        fn timer_did_cancel(&self) {
            self.did_cancel.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stateful_timer_reschedules_itself() {
        let clock = clock(10, 64);
        let countdown = Countdown::new(3);
        let timer = clock.set_timer(10, countdown.clone()).unwrap();
        assert!(countdown.timer_context().is_some());

        assert!(wait_until(Duration::from_secs(5), || countdown.fired.load(Ordering::SeqCst) == 3));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(countdown.fired.load(Ordering::SeqCst), 3);
        assert_eq!(countdown.will_schedule.load(Ordering::SeqCst), 3);
        assert!(!timer.is_scheduled());
    }

    #[test]
    fn test_cancel_hook_runs_only_when_prevented() {
        let clock = clock(10, 64);
        let countdown = Countdown::new(1);
        let timer = clock.set_timer(500, countdown.clone()).unwrap();

        // Reschedule silently replaces the pending fire
        timer.reschedule(600).unwrap();
        assert_eq!(countdown.did_cancel.load(Ordering::SeqCst), 0);

        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert_eq!(countdown.did_cancel.load(Ordering::SeqCst), 1);
    }
}
