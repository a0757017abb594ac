//! Publisher/consumer plumbing on top of [`RingBuffer`] and [`Subscription`].
//!
//! [`channel`] pairs one ring with one subscription and splits the result into
//!
//! - a [`Publisher`], owned by the single producing stage, whose
//!   [`publish`](Publisher::publish) writes the ring and then calls `put_news`;
//! - a [`Feed`], cloneable, from which consumers [`subscribe`](Feed::subscribe).
//!
//! Every producing stage exposes its feed through the [`DataSource`] capability, so a
//! consumer of translated data subscribes exactly like a consumer of raw sensor data.
//!
//! # Consumer protocol
//!
//! ```rust
//! use sensor_gateway::data::source::channel;
//!
//! # fn main() -> sensor_gateway::GatewayResult<()> {
//! let (mut publisher, feed) = channel::<u32>(8)?;
//! let mut subscriber = feed.subscribe();
//!
//! publisher.publish(1);
//! publisher.publish(2);
//!
//! assert_eq!(subscriber.has_news(), 2);
//! let news = subscriber.poll();
//! assert_eq!(news.messages, vec![1, 2]);
//! assert_eq!(subscriber.has_news(), 0);
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

use crate::data::ring_buffer::{RingBuffer, RingReader, RingWriter};
use crate::data::subscription::{SubscriberId, Subscription};
use crate::error::GatewayResult;

/// Capability shared by every stage that produces a stream of `T`.
pub trait DataSource<T> {
    /// Consumer side of this stage.
    fn feed(&self) -> &Feed<T>;

    /// Register a new consumer of this stage.
    fn subscribe(&self) -> Subscriber<T> {
        self.feed().subscribe()
    }

    /// Unread messages for `id` (0 for unknown ids).
    fn has_news(&self, id: SubscriberId) -> usize {
        self.feed().has_news(id)
    }

    /// Clear the unread count for `id`, returning what was cleared. That
    /// subscriber no longer receives the acknowledged messages.
    fn acknowledge(&self, id: SubscriberId) -> usize {
        self.feed().acknowledge(id)
    }
}

/// Create a ring of `capacity` pads with its subscription, split into both ends.
pub fn channel<T: Default>(capacity: usize) -> GatewayResult<(Publisher<T>, Feed<T>)> {
    let (writer, reader) = RingBuffer::with_capacity(capacity)?.split();
    let subscription = Arc::new(Subscription::new());
    // Held shared while publishing and exclusively while subscribing, so a new
    // subscriber's start position always agrees with its counter.
    let gate = Arc::new(RwLock::new(()));

    let publisher = Publisher {
        writer,
        subscription: Arc::clone(&subscription),
        gate: Arc::clone(&gate),
    };
    let feed = Feed {
        reader,
        subscription,
        gate,
    };
    Ok((publisher, feed))
}

/// Writing end of a stage. There is exactly one per ring.
pub struct Publisher<T> {
    writer: RingWriter<T>,
    subscription: Arc<Subscription>,
    gate: Arc<RwLock<()>>,
}

impl<T> Publisher<T> {
    /// Write `value` to the ring, then notify every subscriber.
    pub fn publish(&mut self, value: T) {
        let _gate = self.gate.read();
        self.writer.write(value);
        self.subscription.put_news();
    }

    /// Messages published so far.
    pub fn published(&self) -> u64 {
        self.writer.written()
    }

    /// Ring capacity in messages.
    pub fn capacity(&self) -> usize {
        self.writer.capacity()
    }
}

/// Consumer side of a stage. Cheap to clone.
pub struct Feed<T> {
    reader: RingReader<T>,
    subscription: Arc<Subscription>,
    gate: Arc<RwLock<()>>,
}

impl<T> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            subscription: Arc::clone(&self.subscription),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<T> Feed<T> {
    /// Register a consumer. It sees every message published after this call.
    pub fn subscribe(&self) -> Subscriber<T> {
        let _gate = self.gate.write();
        let id = self.subscription.subscribe();
        let mut reader = self.reader.clone();
        reader.seek_to_head();
        let start = reader.written();
        Subscriber {
            id,
            reader,
            subscription: Arc::clone(&self.subscription),
            start,
            next: start,
            lost: 0,
        }
    }

    /// Unread messages for `id` (0 for unknown ids).
    pub fn has_news(&self, id: SubscriberId) -> usize {
        self.subscription.has_news(id)
    }

    /// Clear the unread count for `id`, returning what was cleared.
    ///
    /// The subscriber behind `id` skips the acknowledged messages on its next read.
    pub fn acknowledge(&self, id: SubscriberId) -> usize {
        self.subscription.get_news(id)
    }

    /// Number of registered consumers.
    pub fn subscriber_count(&self) -> usize {
        self.subscription.subscriber_count()
    }

    /// Messages published so far.
    pub fn published(&self) -> u64 {
        self.reader.written()
    }

    /// Ring capacity in messages.
    pub fn capacity(&self) -> usize {
        self.reader.capacity()
    }
}

impl<T> DataSource<T> for Feed<T> {
    fn feed(&self) -> &Feed<T> {
        self
    }
}

/// Messages drained by one [`Subscriber::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct News<T> {
    /// Surviving messages, oldest first.
    pub messages: Vec<T>,
    /// Messages overwritten before this consumer could read them.
    pub lost: usize,
}

impl<T> News<T> {
    /// Number of messages delivered.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when nothing was delivered.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<T> IntoIterator for News<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

/// A registered consumer: its id plus its own read position in the ring.
///
/// The position is tracked as a write sequence number. Everything below the
/// acknowledged horizon (the subscription point plus every count cleared for this
/// id) has been consumed, whether through [`poll`](Self::poll),
/// [`acknowledge`](Self::acknowledge) or [`DataSource::acknowledge`].
pub struct Subscriber<T> {
    id: SubscriberId,
    reader: RingReader<T>,
    subscription: Arc<Subscription>,
    /// Writes that happened before this consumer registered.
    start: u64,
    /// Sequence number of the next message to deliver.
    next: u64,
    /// Overwritten messages not yet reported through [`News::lost`].
    lost: u64,
}

impl<T> Subscriber<T> {
    /// Id assigned at registration.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Unread messages (may exceed the ring capacity after an overrun).
    pub fn has_news(&self) -> usize {
        self.subscription.has_news(self.id)
    }

    /// True when more messages were published than the ring can hold since the
    /// last acknowledgement.
    pub fn is_overrun(&self) -> bool {
        self.has_news() > self.reader.capacity()
    }

    /// Clear the unread count without reading, returning what was cleared.
    ///
    /// The read position moves past every acknowledged message, so the next
    /// [`poll`](Self::poll) starts with what is published afterwards.
    pub fn acknowledge(&mut self) -> usize {
        let cleared = self.subscription.get_news(self.id);
        self.skip_acknowledged();
        cleared
    }

    fn horizon(&self) -> u64 {
        self.start + self.subscription.acknowledged(self.id)
    }

    fn capacity(&self) -> u64 {
        u64::try_from(self.reader.capacity()).unwrap_or(u64::MAX)
    }

    /// Catch up with acknowledgements made without reading.
    fn skip_acknowledged(&mut self) {
        let horizon = self.horizon();
        if self.next < horizon {
            self.reader.skip(horizon - self.next);
            self.next = horizon;
        }
    }

    /// Jump to sequence `target`, counting everything skipped as lost.
    fn skip_overwritten(&mut self, target: u64) {
        let skipped = target - self.next;
        warn!(
            subscriber = self.id.index(),
            lost = skipped,
            capacity = self.reader.capacity(),
            "Ring overrun, skipping to oldest retained message"
        );
        self.reader.skip(skipped);
        self.next = target;
        self.lost += skipped;
    }
}

impl<T: Clone> Subscriber<T> {
    /// Value at this consumer's read position, without moving.
    pub fn read(&self) -> T {
        self.reader.read()
    }

    /// Next published message not yet delivered, advancing past it.
    ///
    /// Does not touch the unread count: pair it with
    /// [`acknowledge`](Self::acknowledge) once the batch announced by
    /// [`has_news`](Self::has_news) is consumed. Messages overwritten before they
    /// could be read are skipped and reported by the next [`poll`](Self::poll).
    pub fn read_next(&mut self) -> Option<T> {
        self.skip_acknowledged();
        let published = self.reader.written();
        self.take(published)
    }

    /// Read and acknowledge everything published since the previous poll.
    ///
    /// After a ring overrun the read position skips ahead to the oldest surviving
    /// message and the number of overwritten messages is reported in
    /// [`News::lost`]. A writer lapping this consumer while it reads is caught by
    /// the sequence stamp of each pad.
    pub fn poll(&mut self) -> News<T> {
        self.skip_acknowledged();
        let pending = self.subscription.get_news(self.id);
        let horizon = self.horizon();

        let capacity = self.capacity();
        if horizon.saturating_sub(self.next) > capacity {
            self.skip_overwritten(horizon - capacity);
        }

        let mut messages = Vec::with_capacity(pending.min(self.reader.capacity()));
        while let Some(value) = self.take(horizon) {
            messages.push(value);
        }
        let lost = usize::try_from(std::mem::take(&mut self.lost)).unwrap_or(usize::MAX);
        News { messages, lost }
    }

    /// Deliver the message with sequence `self.next` if it is below `bound`.
    fn take(&mut self, bound: u64) -> Option<T> {
        while self.next < bound {
            let (sequence, value) = self.reader.read_stamped();
            match sequence {
                Some(sequence) if sequence == self.next => {
                    self.reader.advance();
                    self.next += 1;
                    return Some(value);
                }
                Some(sequence) if sequence > self.next => {
                    let oldest = self.reader.written().saturating_sub(self.capacity());
                    self.skip_overwritten(oldest.max(self.next + 1));
                }
                _ => return None,
            }
        }
        None
    }
}
