//! Worker pool with managed blocking
//!
//! Spawns `parallelism` OS threads on start. Workers dequeue jobs from a
//! lock-free MPMC queue and park when it runs dry.
//!
//! A worker about to block calls [`WorkerPool::managed_block`]. While it
//! is blocked, the pool may spawn a compensating worker (up to
//! `max_threads`) so the number of runnable workers stays at
//! `parallelism`. Workers beyond that target retire after an idle park
//! timeout.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use stagehand_core::error::{StageError, StageResult};
use stagehand_core::fault::{is_non_fatal, PanicError};
use stagehand_core::spinlock::SpinLock;
use stagehand_core::stage::Job;
use stagehand_core::{kdebug, kerror, kwarn};

use crate::config::TheaterConfig;
use crate::parking::{new_parking, WorkerParking};

thread_local! {
    /// Identity of the pool the current thread works for (0 = none)
    static CURRENT_POOL: Cell<usize> = Cell::new(0);
}

/// Shared state between the pool handle and its workers.
struct PoolInner {
    name: String,
    parallelism: usize,
    max_threads: usize,
    park_timeout: Duration,

    /// Injection queue: submitters → workers.
    queue: SegQueue<Job>,
    /// Jobs submitted and not yet dequeued.
    pending: AtomicUsize,
    parking: Box<dyn WorkerParking>,

    started: AtomicBool,
    shutdown: AtomicBool,
    /// Workers alive, including blocked ones.
    live: AtomicUsize,
    /// Workers inside `managed_block`.
    blocked: AtomicUsize,
    next_id: AtomicUsize,
    handles: SpinLock<Vec<(usize, JoinHandle<()>)>>,
}

/// Handle to a worker pool. Clones share the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool; no threads are spawned until [`start`](Self::start).
    pub fn new(config: &TheaterConfig) -> Self {
        let parallelism = config.parallelism.max(1);
        Self {
            inner: Arc::new(PoolInner {
                name: config.name.clone(),
                parallelism,
                max_threads: config.effective_max_threads().max(parallelism),
                park_timeout: config.park_timeout,
                queue: SegQueue::new(),
                pending: AtomicUsize::new(0),
                parking: new_parking(),
                started: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                live: AtomicUsize::new(0),
                blocked: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                handles: SpinLock::new(Vec::new()),
            }),
        }
    }

    /// Spawn the core workers. Idempotent.
    pub fn start(&self) -> StageResult<()> {
        let inner = &self.inner;
        if inner.shutdown.load(Ordering::SeqCst) {
            return Err(StageError::Rejected);
        }
        if inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for _ in 0..inner.parallelism {
            inner.live.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = inner.spawn_worker() {
                inner.live.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        }
        kdebug!("pool {} started {} workers", inner.name, inner.parallelism);
        Ok(())
    }

    /// Queue a job, starting the pool if needed. Fails with `Rejected` once
    /// shut down.
    pub fn execute(&self, job: Job) -> StageResult<()> {
        let inner = &self.inner;
        if !inner.started.load(Ordering::Acquire) {
            self.start()?;
        }
        inner.pending.fetch_add(1, Ordering::SeqCst);
        if inner.shutdown.load(Ordering::SeqCst) {
            inner.pending.fetch_sub(1, Ordering::SeqCst);
            kwarn!("pool {} rejected job after shutdown", inner.name);
            return Err(StageError::Rejected);
        }
        inner.queue.push(job);
        inner.parking.wake_one();
        Ok(())
    }

    /// Run `f`, which may block, letting the pool compensate with an extra
    /// worker while it does. Outside a worker of this pool `f` just runs.
    pub fn managed_block<R>(&self, f: impl FnOnce() -> R) -> R {
        if !self.is_worker_thread() {
            return f();
        }
        self.inner.blocked.fetch_add(1, Ordering::SeqCst);
        let _guard = BlockedGuard(&self.inner);
        self.inner.compensate();
        f()
    }

    /// Stop accepting jobs. Workers drain the queue, then exit.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::SeqCst) {
            kdebug!("pool {} shutting down", self.inner.name);
        }
        self.inner.parking.wake_all();
    }

    /// Wait up to `timeout` for every worker to exit; returns whether they
    /// did. A worker waiting on its own pool does not wait for itself.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let own = usize::from(self.is_worker_thread());
        loop {
            if self.inner.live.load(Ordering::SeqCst) <= own {
                self.join_finished();
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.inner.parking.wake_all();
            thread::sleep((deadline - now).min(Duration::from_millis(1)));
        }
    }

    fn join_finished(&self) {
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        let me = thread::current().id();
        for (_, handle) in handles {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
    }

    /// Whether the calling thread is one of this pool's workers
    pub fn is_worker_thread(&self) -> bool {
        CURRENT_POOL.with(|current| current.get() == self.inner.key())
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    pub fn parallelism(&self) -> usize {
        self.inner.parallelism
    }

    pub fn max_threads(&self) -> usize {
        self.inner.max_threads
    }

    /// Workers currently alive, including blocked ones
    pub fn live_workers(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Workers currently inside `managed_block`
    pub fn blocked_workers(&self) -> usize {
        self.inner.blocked.load(Ordering::Relaxed)
    }

    /// Jobs submitted and not yet picked up
    pub fn queued(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }
}

struct BlockedGuard<'a>(&'a Arc<PoolInner>);

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.0.blocked.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PoolInner {
    fn key(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    /// Spawn one worker. The caller has already counted it in `live`.
    fn spawn_worker(self: &Arc<Self>) -> StageResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-worker-{}", self.name, id))
            .spawn(move || worker_loop(inner, id))
            .map_err(|e| {
                kerror!("pool {} failed to spawn worker {}: {}", self.name, id, e);
                StageError::SpawnFailed
            })?;
        self.handles.lock().push((id, handle));
        Ok(())
    }

    fn runnable(&self) -> usize {
        let live = self.live.load(Ordering::SeqCst);
        live.saturating_sub(self.blocked.load(Ordering::SeqCst))
    }

    /// Add a worker if blocking left fewer than `parallelism` runnable
    fn compensate(self: &Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let live = self.live.load(Ordering::SeqCst);
            let blocked = self.blocked.load(Ordering::SeqCst);
            if live.saturating_sub(blocked) >= self.parallelism || live >= self.max_threads {
                return;
            }
            if self
                .live
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                match self.spawn_worker() {
                    Ok(()) => kdebug!("pool {} compensating for {} blocked", self.name, blocked),
                    Err(_) => {
                        self.live.fetch_sub(1, Ordering::SeqCst);
                    }
                }
                return;
            }
        }
    }

    /// Claim retirement for an idle surplus worker
    fn try_retire(&self) -> bool {
        loop {
            let live = self.live.load(Ordering::SeqCst);
            let blocked = self.blocked.load(Ordering::SeqCst);
            if live.saturating_sub(blocked) <= self.parallelism
                || self.pending.load(Ordering::SeqCst) > 0
            {
                return false;
            }
            if self
                .live
                .compare_exchange(live, live - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn forget_handle(&self, id: usize) {
        self.handles.lock().retain(|(handle_id, _)| *handle_id != id);
    }

    fn run_job(self: &Arc<Self>, job: Job, id: usize) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            if is_non_fatal(&*payload) {
                kerror!("job panicked: {}", PanicError::from_payload(&*payload));
                return;
            }
            // Fatal: this worker dies; keep the pool at strength.
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.forget_handle(id);
            if !self.shutdown.load(Ordering::SeqCst) {
                self.live.fetch_add(1, Ordering::SeqCst);
                if self.spawn_worker().is_err() {
                    self.live.fetch_sub(1, Ordering::SeqCst);
                }
            }
            kerror!("worker {} terminated by fatal panic", id);
            panic::resume_unwind(payload);
        }
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<PoolInner>, id: usize) {
    CURRENT_POOL.with(|current| current.set(inner.key()));
    kdebug!("worker {} started", id);

    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::SeqCst);
            inner.run_job(job, id);
            continue;
        }

        if inner.shutdown.load(Ordering::SeqCst) && inner.pending.load(Ordering::SeqCst) == 0 {
            inner.live.fetch_sub(1, Ordering::SeqCst);
            break;
        }

        let woken = inner.parking.park(
            &|| inner.pending.load(Ordering::SeqCst) > 0 || inner.shutdown.load(Ordering::SeqCst),
            Some(inner.park_timeout),
        );
        if !woken && inner.runnable() > inner.parallelism && inner.try_retire() {
            inner.forget_handle(id);
            kdebug!("worker {} retired", id);
            break;
        }
    }

    CURRENT_POOL.with(|current| current.set(0));
}
