//! Coalescing queue for end-of-turn flushes.
//!
//! This module holds the bookkeeping half of the coalescing scheduler:
//! - Pending items in enqueue order
//! - A "flush scheduled" flag so only one flush is requested per turn
//! - Optional keys so repeated triggers for the same target collapse
//!
//! The queue never runs anything itself. sync-client decides what a turn is
//! and drains the queue with [`CoalescingQueue::take_batch`].

use std::collections::HashSet;
use std::hash::Hash;

/// Outcome of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// First item since the last flush; the caller must schedule a flush.
    ScheduleFlush,
    /// A flush is already scheduled and will pick this item up.
    AlreadyScheduled,
    /// An item with the same key is already pending; this one was dropped.
    Coalesced,
}

impl Enqueued {
    /// Whether the caller has to schedule a flush.
    pub fn needs_flush(self) -> bool {
        matches!(self, Enqueued::ScheduleFlush)
    }
}

/// Pending set with a single scheduled-flush flag.
#[derive(Debug)]
pub struct CoalescingQueue<K, T> {
    /// Items waiting for the next flush.
    pending: Vec<T>,
    /// Keys of pending keyed items.
    keys: HashSet<K>,
    /// True between the first enqueue of a turn and the flush that drains it.
    scheduled: bool,
}

impl<K: Eq + Hash, T> CoalescingQueue<K, T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            keys: HashSet::new(),
            scheduled: false,
        }
    }

    /// Add an item with no key. Unkeyed items never coalesce.
    pub fn enqueue(&mut self, item: T) -> Enqueued {
        self.pending.push(item);
        self.mark_scheduled()
    }

    /// Add an item under a key. If an item with the same key is pending, the
    /// new one is dropped.
    pub fn enqueue_keyed(&mut self, key: K, item: T) -> Enqueued {
        if !self.keys.insert(key) {
            return Enqueued::Coalesced;
        }
        self.pending.push(item);
        self.mark_scheduled()
    }

    fn mark_scheduled(&mut self) -> Enqueued {
        if self.scheduled {
            Enqueued::AlreadyScheduled
        } else {
            self.scheduled = true;
            Enqueued::ScheduleFlush
        }
    }

    /// Drain every pending item and clear the scheduled flag.
    ///
    /// Items enqueued after this call belong to the next flush, which the
    /// enqueuer will be told to schedule.
    pub fn take_batch(&mut self) -> Vec<T> {
        self.scheduled = false;
        self.keys.clear();
        std::mem::take(&mut self.pending)
    }

    /// Whether a flush is currently scheduled.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K: Eq + Hash, T> Default for CoalescingQueue<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_enqueue_requests_flush() {
        let mut queue: CoalescingQueue<u32, &str> = CoalescingQueue::new();

        assert_eq!(queue.enqueue("a"), Enqueued::ScheduleFlush);
        assert_eq!(queue.enqueue("b"), Enqueued::AlreadyScheduled);
        assert!(queue.is_scheduled());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn batch_preserves_enqueue_order() {
        let mut queue: CoalescingQueue<u32, u32> = CoalescingQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert_eq!(queue.take_batch(), vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert!(!queue.is_scheduled());
    }

    #[test]
    fn keyed_items_collapse_within_a_turn() {
        let mut queue: CoalescingQueue<&str, u32> = CoalescingQueue::new();

        assert!(queue.enqueue_keyed("session", 1).needs_flush());
        assert_eq!(queue.enqueue_keyed("session", 2), Enqueued::Coalesced);
        assert_eq!(queue.enqueue_keyed("other", 3), Enqueued::AlreadyScheduled);

        assert_eq!(queue.take_batch(), vec![1, 3]);
    }

    #[test]
    fn keys_reset_after_flush() {
        let mut queue: CoalescingQueue<&str, u32> = CoalescingQueue::new();
        queue.enqueue_keyed("session", 1);
        queue.take_batch();

        assert_eq!(queue.enqueue_keyed("session", 2), Enqueued::ScheduleFlush);
        assert_eq!(queue.take_batch(), vec![2]);
    }

    #[test]
    fn enqueue_during_flush_schedules_next_turn() {
        let mut queue: CoalescingQueue<u32, u32> = CoalescingQueue::new();
        queue.enqueue(1);

        let batch = queue.take_batch();
        // Simulates a job in `batch` enqueueing more work while it runs.
        let reentrant = queue.enqueue(2);

        assert_eq!(batch, vec![1]);
        assert_eq!(reentrant, Enqueued::ScheduleFlush);
        assert_eq!(queue.take_batch(), vec![2]);
    }

    #[test]
    fn empty_take_is_harmless() {
        let mut queue: CoalescingQueue<u32, u32> = CoalescingQueue::default();
        assert!(queue.take_batch().is_empty());
        assert!(!queue.is_scheduled());
    }
}
