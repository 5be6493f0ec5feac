//! Fixed-capacity circular queue for outbound data-channel units.
//!
//! One slot is always left empty so that `head == tail` means empty and
//! `(head + 1) % capacity == tail` means full, without a separate counter.
//! A buffer of capacity `n` therefore holds at most `n - 1` items.

/// Fixed-capacity FIFO. Storage is allocated once at construction.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    /// Next slot to write.
    head: usize,
    /// Next slot to read.
    tail: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer with `capacity` slots (at least 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
        }
    }

    /// Number of slots, including the one kept empty.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        (self.head + self.capacity() - self.tail) % self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) % self.capacity() == self.tail
    }

    /// Append `item`; a full buffer rejects it and hands it back.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % self.capacity();
        Ok(())
    }

    /// The oldest item, left in place.
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.tail].as_ref()
    }

    /// Remove and return the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % self.capacity();
        item
    }

    /// Drop every queued item and return how many there were.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0usize;
        while self.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_keeps_one_slot_empty() {
        let mut ring = RingBuffer::new(16);
        for i in 0..15 {
            assert!(ring.push(i).is_ok(), "push {i} should fit");
        }
        assert!(ring.is_full());
        assert_eq!(ring.push(15), Err(15));
        assert_eq!(ring.len(), 15);
    }

    #[test]
    fn fifo_order_across_wraparound() {
        let mut ring = RingBuffer::new(4);
        for round in 0..5 {
            ring.push(round * 10).unwrap();
            ring.push(round * 10 + 1).unwrap();
            assert_eq!(ring.pop(), Some(round * 10));
            assert_eq!(ring.pop(), Some(round * 10 + 1));
        }
        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut ring = RingBuffer::new(4);
        assert_eq!(ring.peek(), None);
        ring.push("a").unwrap();
        ring.push("b").unwrap();

        assert_eq!(ring.peek(), Some(&"a"));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop(), Some("a"));
        assert_eq!(ring.peek(), Some(&"b"));
    }

    #[test]
    fn rejected_push_leaves_contents_intact() {
        let mut ring = RingBuffer::new(3);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.push(3), Err(3));

        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn clear_reports_dropped_count() {
        let mut ring = RingBuffer::new(8);
        for i in 0..5 {
            ring.push(i).unwrap();
        }
        assert_eq!(ring.clear(), 5);
        assert!(ring.is_empty());
    }

    #[test]
    fn tiny_capacity_is_raised_to_two() {
        let mut ring = RingBuffer::new(0);
        assert_eq!(ring.capacity(), 2);
        ring.push(()).unwrap();
        assert!(ring.is_full());
    }
}
