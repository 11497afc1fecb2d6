//! End-of-turn coalescing scheduler.
//!
//! Jobs enqueued during one turn run together in a single flush once the
//! current task yields. Keyed jobs collapse: the first job for a key wins and
//! later ones in the same turn are dropped. A job that enqueues more work
//! during the flush lands in the next turn's batch.
//!
//! The queue bookkeeping lives in [`livesync_core::CoalescingQueue`]; this
//! module only decides *when* a batch runs.

use livesync_core::{CoalescingQueue, Enqueued};
use livesync_types::SessionId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Batches jobs into one flush per turn.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    queue: Mutex<CoalescingQueue<SessionId, Job>>,
    /// Completed flush count.
    flushes: watch::Sender<u64>,
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, CoalescingQueue<SessionId, Job>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        let (flushes, _) = watch::channel(0);
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(CoalescingQueue::new()),
                flushes,
            }),
        }
    }

    /// Queue a job for the end of the current turn.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        let outcome = self.inner.lock().enqueue(Box::new(job));
        self.after_enqueue(outcome);
    }

    /// Queue a job unless one with the same key is already pending this turn.
    ///
    /// Returns false if the job was coalesced away.
    pub fn enqueue_keyed(&self, key: SessionId, job: impl FnOnce() + Send + 'static) -> bool {
        let outcome = self.inner.lock().enqueue_keyed(key, Box::new(job));
        self.after_enqueue(outcome);
        outcome != Enqueued::Coalesced
    }

    /// Number of jobs waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.lock().len()
    }

    /// Number of flushes completed so far.
    pub fn flush_count(&self) -> u64 {
        *self.inner.flushes.borrow()
    }

    /// Wait until no flush is scheduled, including flushes scheduled by jobs
    /// of an earlier flush. Returns the flush count at that point.
    pub async fn flushed(&self) -> u64 {
        let mut rx = self.inner.flushes.subscribe();
        while self.inner.lock().is_scheduled() {
            // The sender lives as long as `self`, so this cannot fail.
            if rx.changed().await.is_err() {
                break;
            }
        }
        let count = *rx.borrow();
        count
    }

    fn after_enqueue(&self, outcome: Enqueued) {
        if !outcome.needs_flush() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { flush(&inner) });
            }
            // No runtime to defer to: run the batch now.
            Err(_) => flush(&inner),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("flushes", &self.flush_count())
            .finish()
    }
}

fn flush(inner: &SchedulerInner) {
    // Take the batch before running anything so that jobs enqueued by the
    // batch schedule a fresh flush.
    let batch = inner.lock().take_batch();
    let size = batch.len();
    for job in batch {
        job();
    }
    inner.flushes.send_modify(|count| *count += 1);
    tracing::debug!("scheduler flushed {} job(s)", size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test]
    async fn same_turn_enqueues_share_one_flush() {
        let scheduler = Scheduler::new();
        let runs = counter();

        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            scheduler.enqueue(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0, "nothing runs before the turn ends");
        assert_eq!(scheduler.pending(), 5);

        assert_eq!(scheduler.flushed().await, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.flush_count(), 1);
    }

    #[tokio::test]
    async fn keyed_jobs_collapse_within_a_turn() {
        let scheduler = Scheduler::new();
        let runs = counter();
        let key = SessionId::new();

        let first = Arc::clone(&runs);
        assert!(scheduler.enqueue_keyed(key, move || {
            first.fetch_add(1, Ordering::SeqCst);
        }));
        let second = Arc::clone(&runs);
        assert!(!scheduler.enqueue_keyed(key, move || {
            second.fetch_add(10, Ordering::SeqCst);
        }));

        scheduler.flushed().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keys_are_released_after_flush() {
        let scheduler = Scheduler::new();
        let key = SessionId::new();

        assert!(scheduler.enqueue_keyed(key, || {}));
        scheduler.flushed().await;
        assert!(scheduler.enqueue_keyed(key, || {}));
    }

    #[tokio::test]
    async fn reentrant_enqueue_runs_next_turn() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let nested = scheduler.clone();
        let log = Arc::clone(&order);
        scheduler.enqueue(move || {
            log.lock().unwrap().push(("outer", nested.flush_count()));
            let log = Arc::clone(&log);
            let inner_view = nested.clone();
            nested.enqueue(move || {
                log.lock().unwrap().push(("inner", inner_view.flush_count()));
            });
        });

        assert_eq!(scheduler.flushed().await, 2);
        // The nested job ran in the flush after the one that queued it.
        assert_eq!(*order.lock().unwrap(), vec![("outer", 0), ("inner", 1)]);
    }

    #[tokio::test]
    async fn flushed_returns_immediately_when_idle() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.flushed().await, 0);
    }

    #[test]
    fn runs_inline_without_runtime() {
        let scheduler = Scheduler::new();
        let runs = counter();
        let job_runs = Arc::clone(&runs);

        scheduler.enqueue(move || {
            job_runs.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.flush_count(), 1);
    }
}
