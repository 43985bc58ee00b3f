//! Wheel buckets: lock-free singly-linked event queues
//!
//! Each bucket is a list that only grows at the tail. Producers on any
//! thread CAS-link new events after the last node; the sweep thread is the
//! only one that advances `head`.
//!
//! The last node's `insert_tick` is the next tick the sweep thread will
//! execute for this bucket. A producer whose target tick is below it lost
//! the race with the sweep and must retry one tick later.
//!
//! Nodes unlinked by a sweep are retired, not freed: a producer may still
//! be walking through them from a stale `foot`. Every traversal holds the
//! bucket's `readers` count, and retired nodes are freed only once a sweep
//! observes `readers == 0` after publishing the new `foot`.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use stagehand_core::spinlock::SpinLock;

use super::timer::ClockTrigger;

/// A queue node
pub(crate) struct ClockEvent {
    /// Bucket tick the node was linked behind
    pub(crate) insert_tick: u64,
    /// Tick at which to fire
    pub(crate) target_tick: u64,
    /// `None` for sentinels
    pub(crate) trigger: Option<Arc<ClockTrigger>>,
    /// Set exactly once, by CAS from null
    pub(crate) next: AtomicPtr<ClockEvent>,
}

impl ClockEvent {
    pub(crate) fn event(target_tick: u64, trigger: Arc<ClockTrigger>) -> Box<Self> {
        Box::new(Self {
            insert_tick: 0,
            target_tick,
            trigger: Some(trigger),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    pub(crate) fn sentinel(insert_tick: u64) -> Box<Self> {
        Box::new(Self {
            insert_tick,
            target_tick: insert_tick,
            trigger: None,
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }
}

impl fmt::Debug for ClockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockEvent")
            .field("insert_tick", &self.insert_tick)
            .field("target_tick", &self.target_tick)
            .field("sentinel", &self.trigger.is_none())
            .finish()
    }
}

/// Retired node awaiting reclamation
struct Retired(*mut ClockEvent);

// SAFETY: retired nodes are unreachable from `head`/`foot` and are only
// freed by the sweep thread or the queue's destructor.
unsafe impl Send for Retired {}

/// One bucket of the dial
pub(crate) struct ClockQueue {
    /// First live node; advanced only by the sweep thread
    head: AtomicPtr<ClockEvent>,
    /// Cached tail hint, updated best-effort
    foot: AtomicPtr<ClockEvent>,
    /// Producers currently traversing this bucket
    readers: AtomicUsize,
    retired: SpinLock<Vec<Retired>>,
}

struct ReaderGuard<'a>(&'a AtomicUsize);

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ClockQueue {
    /// Bucket `index` starts with a sentinel for its first tick
    pub(crate) fn new(index: u64) -> Self {
        let sentinel = Box::into_raw(ClockEvent::sentinel(index));
        Self {
            head: AtomicPtr::new(sentinel),
            foot: AtomicPtr::new(sentinel),
            readers: AtomicUsize::new(0),
            retired: SpinLock::new(Vec::new()),
        }
    }

    /// Link `node` at the tail.
    ///
    /// Events inherit the tail's `insert_tick`. An event whose target tick
    /// is below it is handed back so the caller can retry a tick later.
    /// Sentinels are always linked.
    pub(crate) fn push(&self, node: Box<ClockEvent>) -> Result<*mut ClockEvent, Box<ClockEvent>> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        let _reader = ReaderGuard(&self.readers);

        let is_event = node.trigger.is_some();
        let node = Box::into_raw(node);
        let foot = self.foot.load(Ordering::SeqCst);
        let mut tail = foot;
        loop {
            // SAFETY: `tail` was reachable after we registered as a reader,
            // so it is not freed until we drop `_reader`.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if !next.is_null() {
                tail = next;
                continue;
            }

            if is_event {
                // SAFETY: `node` is still exclusively ours until linked.
                unsafe {
                    let tail_tick = (*tail).insert_tick;
                    if tail_tick > (*node).target_tick {
                        return Err(Box::from_raw(node));
                    }
                    (*node).insert_tick = tail_tick;
                }
            }

            // SAFETY: as above.
            let linked = unsafe {
                (*tail).next.compare_exchange(
                    ptr::null_mut(),
                    node,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
            };
            match linked {
                Ok(_) => {
                    let _ = self
                        .foot
                        .compare_exchange(foot, node, Ordering::SeqCst, Ordering::Relaxed);
                    return Ok(node);
                }
                // Lost the race; keep walking from the winner
                Err(actual) => tail = actual,
            }
        }
    }

    /// Walk from `head` up to (not including) `until`, then make `until`
    /// the new head and retire the walked nodes.
    ///
    /// Only the sweep thread may call this.
    pub(crate) fn drain_to(&self, until: *mut ClockEvent, mut visit: impl FnMut(&ClockEvent)) {
        let mut node = self.head.load(Ordering::Relaxed);
        let mut walked = Vec::new();
        while node != until {
            // SAFETY: nodes between head and a linked sentinel are live and
            // their `next` is set.
            let event = unsafe { &*node };
            visit(event);
            walked.push(Retired(node));
            node = event.next.load(Ordering::Acquire);
        }

        self.head.store(until, Ordering::SeqCst);
        self.foot.store(until, Ordering::SeqCst);

        let mut retired = self.retired.lock();
        retired.extend(walked);
        if self.readers.load(Ordering::SeqCst) == 0 {
            for Retired(node) in retired.drain(..) {
                // SAFETY: unreachable from `foot`, and no traversal that
                // could have seen them is in progress.
                unsafe { drop(Box::from_raw(node)) };
            }
        }
    }

    /// Visit every node from `head` to the current tail
    pub(crate) fn for_each(&self, mut visit: impl FnMut(&ClockEvent)) {
        self.readers.fetch_add(1, Ordering::SeqCst);
        let _reader = ReaderGuard(&self.readers);

        let mut node = self.head.load(Ordering::SeqCst);
        while !node.is_null() {
            // SAFETY: registered as a reader.
            let event = unsafe { &*node };
            visit(event);
            node = event.next.load(Ordering::Acquire);
        }
    }

    #[cfg(test)]
    pub(crate) fn retired_len(&self) -> usize {
        self.retired.lock().len()
    }
}

impl Drop for ClockQueue {
    fn drop(&mut self) {
        for Retired(node) in self.retired.lock().drain(..) {
            // SAFETY: exclusive access in drop.
            unsafe { drop(Box::from_raw(node)) };
        }
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            // SAFETY: exclusive access in drop; each node is freed once.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(queue: &ClockQueue) -> Vec<(u64, u64, bool)> {
        let mut out = Vec::new();
        queue.for_each(|e| out.push((e.insert_tick, e.target_tick, e.trigger.is_some())));
        out
    }

    #[test]
    fn test_events_inherit_insert_tick() {
        let queue = ClockQueue::new(3);
        queue.push(ClockEvent::event(3, ClockTrigger::disarmed())).unwrap();
        queue.push(ClockEvent::event(67, ClockTrigger::disarmed())).unwrap();
        assert_eq!(
            targets(&queue),
            vec![(3, 3, false), (3, 3, true), (3, 67, true)]
        );
    }

    #[test]
    fn test_late_event_is_rejected() {
        let queue = ClockQueue::new(3);
        queue.push(ClockEvent::sentinel(3 + 64)).unwrap();
        let rejected = queue.push(ClockEvent::event(3, ClockTrigger::disarmed()));
        assert_eq!(rejected.unwrap_err().target_tick, 3);
        assert!(queue.push(ClockEvent::event(67, ClockTrigger::disarmed())).is_ok());
    }

    #[test]
    fn test_debug_marks_sentinels() {
        let sentinel = format!("{:?}", ClockEvent::sentinel(5));
        assert!(sentinel.contains("target_tick: 5"));
        assert!(sentinel.contains("sentinel: true"));
        let event = format!("{:?}", ClockEvent::event(9, ClockTrigger::disarmed()));
        assert!(event.contains("sentinel: false"));
    }

    #[test]
    fn test_drain_retires_and_frees() {
        let queue = ClockQueue::new(0);
        queue.push(ClockEvent::event(0, ClockTrigger::disarmed())).unwrap();
        queue.push(ClockEvent::event(0, ClockTrigger::disarmed())).unwrap();
        let sentinel = queue.push(ClockEvent::sentinel(8)).unwrap();

        let mut seen = 0;
        queue.drain_to(sentinel, |_| seen += 1);
        assert_eq!(seen, 3);
        // No concurrent readers, so everything walked was freed
        assert_eq!(queue.retired_len(), 0);
        assert_eq!(targets(&queue), vec![(8, 8, false)]);
    }

    #[test]
    fn test_drain_defers_free_while_reading() {
        let queue = ClockQueue::new(0);
        let sentinel = queue.push(ClockEvent::sentinel(8)).unwrap();
        queue.readers.fetch_add(1, Ordering::SeqCst);
        queue.drain_to(sentinel, |_| {});
        assert_eq!(queue.retired_len(), 1);
        queue.readers.fetch_sub(1, Ordering::SeqCst);
    }

    #[test]
    fn test_concurrent_push_links_everything() {
        let queue = Arc::new(ClockQueue::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        queue.push(ClockEvent::event(0, ClockTrigger::disarmed())).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(targets(&queue).len(), 1 + 8 * 500);
    }
}
