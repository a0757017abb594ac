//! Fixed-capacity broadcast ring buffer built from linked pads.
//!
//! The ring is a closed cycle of `N` [`RingBufferPad`]s, each holding one message
//! slot and the position of its successor. The cycle is linked exactly once, when
//! the buffer is created; afterwards every `set_next` call is inert.
//!
//! # Ownership
//!
//! [`RingBuffer::split`] consumes the buffer and hands out exactly one
//! [`RingWriter`] and one [`RingReader`]:
//!
//! - **`RingWriter`**: not `Clone`, `write` takes `&mut self`. Holding it is the only
//!   way to advance the write cursor, so the single-writer rule is checked by the
//!   compiler.
//! - **`RingReader`**: freely cloneable. Each clone tracks its own read position and
//!   never touches the write cursor.
//!
//! # Overrun
//!
//! Writes never block. A writer that laps a reader silently overwrites pads the
//! reader has not seen yet. Every write is stamped with its sequence number (the
//! count of writes before it) and stored next to the value, so a reader can tell
//! whether a pad still holds the message it expects or a newer one (see
//! [`crate::data::source::Subscriber::poll`]).
//!
//! # Layout
//! ```text
//!   cursor
//!     |
//!     v
//!   [pad 0] -> [pad 1] -> [pad 2] -> ... -> [pad N-1] -+
//!      ^                                               |
//!      +-----------------------------------------------+
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{GatewayError, GatewayResult};

/// One storage slot plus its successor link.
///
/// Pads carry identity (their position in the ring) and are never copied.
pub struct RingBufferPad<T> {
    position: usize,
    next: OnceLock<usize>,
    slot: RwLock<Slot<T>>,
}

struct Slot<T> {
    /// Sequence number of the write held, `None` before the first write.
    sequence: Option<u64>,
    value: T,
}

impl<T: Default> RingBufferPad<T> {
    /// Create an unlinked pad holding the default value.
    ///
    /// Until [`set_next`](Self::set_next) is called the pad is its own successor.
    pub fn new(position: usize) -> Self {
        Self {
            position,
            next: OnceLock::new(),
            slot: RwLock::new(Slot {
                sequence: None,
                value: T::default(),
            }),
        }
    }
}

impl<T> RingBufferPad<T> {
    /// Position of this pad inside its ring.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Position of the successor pad (own position while unlinked).
    pub fn next(&self) -> usize {
        self.next.get().copied().unwrap_or(self.position)
    }

    /// Link the successor. Only the first call has an effect.
    ///
    /// Returns `true` if this call set the link.
    pub fn set_next(&self, next: usize) -> bool {
        self.next.set(next).is_ok()
    }

    /// Whether the successor link has been set.
    pub fn is_linked(&self) -> bool {
        self.next.get().is_some()
    }

    /// Sequence number of the write currently held, `None` while never written.
    pub fn sequence(&self) -> Option<u64> {
        self.slot.read().sequence
    }

    fn store(&self, sequence: u64, value: T) {
        *self.slot.write() = Slot {
            sequence: Some(sequence),
            value,
        };
    }
}

impl<T: Clone> RingBufferPad<T> {
    /// Copy of the value currently held by the pad.
    pub fn load(&self) -> T {
        self.slot.read().value.clone()
    }

    /// Sequence number and value, taken together under the pad lock.
    pub fn load_stamped(&self) -> (Option<u64>, T) {
        let slot = self.slot.read();
        (slot.sequence, slot.value.clone())
    }
}

impl<T> fmt::Debug for RingBufferPad<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBufferPad")
            .field("position", &self.position)
            .field("next", &self.next())
            .finish_non_exhaustive()
    }
}

struct RingShared<T> {
    pads: Box<[RingBufferPad<T>]>,
    /// Position of the pad the next write goes to.
    cursor: AtomicUsize,
    /// Total writes since creation.
    written: AtomicU64,
}

impl<T> RingShared<T> {
    fn pad(&self, position: usize) -> &RingBufferPad<T> {
        &self.pads[position % self.pads.len()]
    }
}

/// A closed cycle of pre-linked pads, before it is split into writer and reader.
pub struct RingBuffer<T> {
    shared: Arc<RingShared<T>>,
}

impl<T: Default> RingBuffer<T> {
    /// Create a ring of `capacity` pads, each initialized to `T::default()`.
    ///
    /// # Errors
    /// [`GatewayError::InvalidCapacity`] when `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> GatewayResult<Self> {
        if capacity == 0 {
            return Err(GatewayError::InvalidCapacity);
        }

        let pads: Box<[RingBufferPad<T>]> = (0..capacity).map(RingBufferPad::new).collect();
        for pad in pads.iter() {
            pad.set_next((pad.position() + 1) % capacity);
        }

        Ok(Self {
            shared: Arc::new(RingShared {
                pads,
                cursor: AtomicUsize::new(0),
                written: AtomicU64::new(0),
            }),
        })
    }
}

impl<T> RingBuffer<T> {
    /// Number of pads in the ring.
    pub fn capacity(&self) -> usize {
        self.shared.pads.len()
    }

    /// Pad at `position`, if it exists.
    pub fn pad(&self, position: usize) -> Option<&RingBufferPad<T>> {
        self.shared.pads.get(position)
    }

    /// Hand out the unique writer and a reader template.
    pub fn split(self) -> (RingWriter<T>, RingReader<T>) {
        let writer = RingWriter {
            shared: Arc::clone(&self.shared),
            cursor: 0,
        };
        let reader = RingReader {
            shared: self.shared,
            position: 0,
        };
        (writer, reader)
    }
}

/// The single writer of a ring. Cannot be cloned.
pub struct RingWriter<T> {
    shared: Arc<RingShared<T>>,
    cursor: usize,
}

impl<T> RingWriter<T> {
    /// Store `value` at the cursor and advance the cursor to the successor pad.
    pub fn write(&mut self, value: T) {
        let sequence = self.shared.written.load(Ordering::Relaxed);
        let pad = self.shared.pad(self.cursor);
        pad.store(sequence, value);
        self.cursor = pad.next();
        self.shared.cursor.store(self.cursor, Ordering::Release);
        self.shared.written.fetch_add(1, Ordering::Release);
    }

    /// Position of the pad the next write goes to.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total writes since creation.
    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Number of pads in the ring.
    pub fn capacity(&self) -> usize {
        self.shared.pads.len()
    }
}

impl<T> fmt::Debug for RingWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingWriter")
            .field("cursor", &self.cursor)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Read access to a ring with a consumer-owned position.
pub struct RingReader<T> {
    shared: Arc<RingShared<T>>,
    position: usize,
}

impl<T> Clone for RingReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            position: self.position,
        }
    }
}

impl<T> RingReader<T> {
    /// Position of the next pad this reader will read.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move to the successor pad.
    pub fn advance(&mut self) {
        self.position = self.shared.pad(self.position).next();
    }

    /// Move forward `count` pads.
    pub fn skip(&mut self, count: u64) {
        let capacity = u64::try_from(self.capacity()).unwrap_or(u64::MAX);
        for _ in 0..count % capacity {
            self.advance();
        }
    }

    /// Jump to the writer's cursor, i.e. the pad the next write goes to.
    pub fn seek_to_head(&mut self) {
        self.position = self.shared.cursor.load(Ordering::Acquire);
    }

    /// Position of the pad the next write goes to.
    pub fn head(&self) -> usize {
        self.shared.cursor.load(Ordering::Acquire)
    }

    /// Total writes since creation.
    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Number of pads in the ring.
    pub fn capacity(&self) -> usize {
        self.shared.pads.len()
    }
}

impl<T: Clone> RingReader<T> {
    /// Value at this reader's position, without moving.
    pub fn read(&self) -> T {
        self.shared.pad(self.position).load()
    }

    /// Sequence number and value at this reader's position, without moving.
    pub fn read_stamped(&self) -> (Option<u64>, T) {
        self.shared.pad(self.position).load_stamped()
    }

    /// Value at this reader's position, then move to the successor.
    pub fn read_next(&mut self) -> T {
        let value = self.read();
        self.advance();
        value
    }
}

impl<T> fmt::Debug for RingReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingReader")
            .field("position", &self.position)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_pad_is_its_own_successor() {
        let pad: RingBufferPad<u32> = RingBufferPad::new(7);
        assert_eq!(pad.next(), pad.position());
        assert!(!pad.is_linked());
        assert_eq!(pad.load(), 0);
        assert_eq!(pad.sequence(), None);
    }

    #[test]
    fn pad_link_is_set_exactly_once() {
        let pad: RingBufferPad<u32> = RingBufferPad::new(0);
        assert!(pad.set_next(3));
        assert_eq!(pad.next(), 3);

        assert!(!pad.set_next(5));
        assert_eq!(pad.next(), 3);
    }

    #[test]
    fn construction_links_a_closed_cycle() {
        let ring: RingBuffer<u8> = RingBuffer::with_capacity(4).unwrap();
        assert_eq!(ring.capacity(), 4);

        let mut position = 0;
        for _ in 0..4 {
            let pad = ring.pad(position).unwrap();
            assert!(pad.is_linked());
            // Relinking at runtime is inert.
            assert!(!pad.set_next(position));
            position = pad.next();
        }
        assert_eq!(position, 0);
    }

    #[test]
    fn single_pad_ring_links_to_itself() {
        let ring: RingBuffer<u8> = RingBuffer::with_capacity(1).unwrap();
        let pad = ring.pad(0).unwrap();
        assert!(pad.is_linked());
        assert_eq!(pad.next(), 0);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = RingBuffer::<u8>::with_capacity(0);
        assert!(matches!(result, Err(GatewayError::InvalidCapacity)));
    }

    #[test]
    fn pads_start_with_default_value() {
        let (_writer, mut reader) = RingBuffer::<String>::with_capacity(3).unwrap().split();
        for _ in 0..3 {
            assert_eq!(reader.read_next(), String::new());
        }
    }

    #[test]
    fn write_advances_cursor_and_readers_follow_write_order() {
        let (mut writer, template) = RingBuffer::with_capacity(4).unwrap().split();
        let mut reader = template.clone();

        for value in 1..=3u32 {
            writer.write(value);
        }
        assert_eq!(writer.cursor(), 3);
        assert_eq!(writer.written(), 3);
        assert_eq!(reader.head(), 3);

        assert_eq!(reader.read_next(), 1);
        assert_eq!(reader.read_next(), 2);
        assert_eq!(reader.read(), 3);
        assert_eq!(reader.position(), 2);

        // The template kept its own position.
        assert_eq!(template.position(), 0);
    }

    #[test]
    fn writer_laps_and_overwrites_unread_pads() {
        let (mut writer, mut reader) = RingBuffer::with_capacity(3).unwrap().split();
        for value in 0..5u32 {
            writer.write(value);
        }
        // Pads 0 and 1 were overwritten by 3 and 4.
        assert_eq!(reader.read_stamped(), (Some(3), 3));
        assert_eq!(reader.read_next(), 3);
        assert_eq!(reader.read_next(), 4);
        assert_eq!(reader.read_next(), 2);
        assert_eq!(writer.written(), 5);
    }

    #[test]
    fn skip_and_seek_move_only_the_reader() {
        let (mut writer, mut reader) = RingBuffer::with_capacity(5).unwrap().split();
        for value in 0..4u32 {
            writer.write(value);
        }
        reader.skip(2);
        assert_eq!(reader.read(), 2);

        reader.seek_to_head();
        assert_eq!(reader.position(), 4);
        assert_eq!(writer.cursor(), 4);
    }

    #[test]
    fn concurrent_writer_and_reader() {
        let (mut writer, reader) = RingBuffer::<u64>::with_capacity(64).unwrap().split();

        let producer = thread::spawn(move || {
            for value in 1..=10_000u64 {
                writer.write(value);
            }
            writer
        });

        let consumer = thread::spawn(move || {
            let mut reader = reader;
            let mut seen = 0;
            while reader.written() < 10_000 {
                // Values are either the default or something the writer produced.
                assert!(reader.read_next() <= 10_000);
                seen += 1;
            }
            seen
        });

        let writer = producer.join().unwrap();
        consumer.join().unwrap();
        assert_eq!(writer.written(), 10_000);
    }
}
