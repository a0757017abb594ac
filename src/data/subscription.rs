//! Per-consumer unread-message counters.
//!
//! A [`Subscription`] decouples "a message was written" from "this consumer has seen
//! it". Every registered consumer owns one counter:
//!
//! - `put_news` (writer) bumps every counter by one after each publish,
//! - `has_news` (consumer) peeks at its own counter,
//! - `get_news` (consumer) clears its own counter and returns what it cleared.
//!
//! Cleared counts also add up to a per-consumer acknowledged total, which lets the
//! consumer's read position follow acknowledgements made through any handle.
//!
//! Unknown ids are never an error: they read as zero and clearing them does nothing.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Opaque consumer handle: a dense, zero-based index that is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(usize);

impl SubscriberId {
    /// Underlying index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for SubscriberId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber#{}", self.0)
    }
}

#[derive(Default)]
struct Counter {
    pending: AtomicUsize,
    acknowledged: AtomicU64,
}

/// Mapping from [`SubscriberId`] to a pending-news counter.
#[derive(Default)]
pub struct Subscription {
    counters: RwLock<Vec<Counter>>,
}

impl Subscription {
    /// Create a subscription without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer. Ids are handed out as 0, 1, 2, ... in call order.
    pub fn subscribe(&self) -> SubscriberId {
        let mut counters = self.counters.write();
        counters.push(Counter::default());
        SubscriberId(counters.len() - 1)
    }

    /// Unread messages for `id` (0 for unknown ids).
    pub fn has_news(&self, id: SubscriberId) -> usize {
        self.counters
            .read()
            .get(id.0)
            .map_or(0, |counter| counter.pending.load(Ordering::Acquire))
    }

    /// Clear the counter of `id` and return the count that was cleared.
    ///
    /// Other subscribers are untouched; unknown ids are a no-op returning 0.
    pub fn get_news(&self, id: SubscriberId) -> usize {
        self.counters
            .read()
            .get(id.0)
            .map_or(0, |counter| {
                let cleared = counter.pending.swap(0, Ordering::AcqRel);
                let total = u64::try_from(cleared).unwrap_or(u64::MAX);
                counter.acknowledged.fetch_add(total, Ordering::AcqRel);
                cleared
            })
    }

    /// Sum of every count `get_news` cleared for `id` (0 for unknown ids).
    pub fn acknowledged(&self, id: SubscriberId) -> u64 {
        self.counters
            .read()
            .get(id.0)
            .map_or(0, |counter| counter.acknowledged.load(Ordering::Acquire))
    }

    /// Add one unread message to every subscriber.
    pub fn put_news(&self) {
        for counter in self.counters.read().iter() {
            counter.pending.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.counters.read().len()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ids_are_dense_and_in_call_order() {
        let subscription = Subscription::new();
        let ids: Vec<_> = (0..5).map(|_| subscription.subscribe().index()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(subscription.subscriber_count(), 5);
    }

    #[test]
    fn counts_accumulate_without_acknowledgement() {
        let subscription = Subscription::new();
        let id = subscription.subscribe();
        assert_eq!(subscription.has_news(id), 0);

        for n in 1..=100 {
            subscription.put_news();
            assert_eq!(subscription.has_news(id), n);
        }
    }

    #[test]
    fn get_news_clears_only_the_caller() {
        let subscription = Subscription::new();
        let a = subscription.subscribe();
        let b = subscription.subscribe();
        subscription.put_news();
        subscription.put_news();

        assert_eq!(subscription.get_news(a), 2);
        assert_eq!(subscription.has_news(a), 0);
        assert_eq!(subscription.has_news(b), 2);
    }

    #[test]
    fn acknowledged_total_accumulates_cleared_counts() {
        let subscription = Subscription::new();
        let id = subscription.subscribe();
        subscription.put_news();
        subscription.put_news();
        assert_eq!(subscription.get_news(id), 2);
        subscription.put_news();
        assert_eq!(subscription.get_news(id), 1);
        assert_eq!(subscription.get_news(id), 0);

        assert_eq!(subscription.acknowledged(id), 3);
        assert_eq!(subscription.acknowledged(SubscriberId::from(7)), 0);
    }

    #[test]
    fn unknown_ids_are_safe_no_ops() {
        let subscription = Subscription::new();
        let known = subscription.subscribe();
        subscription.put_news();

        let unknown = SubscriberId::from(42);
        assert_eq!(subscription.has_news(unknown), 0);
        assert_eq!(subscription.get_news(unknown), 0);
        assert_eq!(subscription.has_news(SubscriberId::from(usize::MAX)), 0);
        assert_eq!(subscription.has_news(known), 1);
    }

    #[test]
    fn late_subscriber_starts_at_zero() {
        let subscription = Subscription::new();
        let early = subscription.subscribe();
        subscription.put_news();
        let late = subscription.subscribe();
        subscription.put_news();

        assert_eq!(subscription.has_news(early), 2);
        assert_eq!(subscription.has_news(late), 1);
    }

    #[test]
    fn concurrent_put_and_get_lose_no_increment() {
        let subscription = Arc::new(Subscription::new());
        let id = subscription.subscribe();

        let writer = {
            let subscription = Arc::clone(&subscription);
            thread::spawn(move || {
                for _ in 0..50_000 {
                    subscription.put_news();
                }
            })
        };

        let mut acknowledged = 0;
        while !writer.is_finished() {
            acknowledged += subscription.get_news(id);
        }
        writer.join().unwrap();
        acknowledged += subscription.get_news(id);

        assert_eq!(acknowledged, 50_000);
    }
}
