//! Bounded free queue with an explicit closed state.
//!
//! Not internally synchronised: the pool keeps it inside its state mutex so
//! the closed check and the insert happen under the same lock. Once closed,
//! every push is handed back to the caller as [`PushError::Closed`].

use std::collections::VecDeque;

/// A rejected insert, returning the item to the caller.
#[derive(Debug)]
pub enum PushError<T> {
    /// The queue already holds `capacity` items.
    Full(T),
    /// The queue was closed; it will never accept items again.
    Closed(T),
}

/// Bounded FIFO of idle items.
#[derive(Debug)]
pub struct FreeQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

impl<T> FreeQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            closed: false,
        }
    }

    /// Append `item` unless the queue is closed or full.
    pub fn try_push(&mut self, item: T) -> Result<(), PushError<T>> {
        if self.closed {
            return Err(PushError::Closed(item));
        }
        if self.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Take the oldest item without waiting.
    pub fn try_pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Close the queue and hand back everything still in it.
    ///
    /// Closing twice returns an empty drain the second time.
    pub fn close(&mut self) -> Vec<T> {
        self.closed = true;
        self.items.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_fifo() {
        let mut q = FreeQueue::with_capacity(3);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        q.try_push(3).unwrap();
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn push_beyond_capacity_returns_item() {
        let mut q = FreeQueue::with_capacity(1);
        q.try_push("a").unwrap();
        match q.try_push("b") {
            Err(PushError::Full(item)) => assert_eq!(item, "b"),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn close_drains_and_rejects_further_pushes() {
        let mut q = FreeQueue::with_capacity(4);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();

        assert_eq!(q.close(), vec![1, 2]);
        assert!(q.is_closed());
        assert!(q.is_empty());

        match q.try_push(3) {
            Err(PushError::Closed(item)) => assert_eq!(item, 3),
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(q.close().is_empty());
    }

    #[test]
    fn pop_on_empty_queue_does_not_block() {
        let mut q: FreeQueue<u8> = FreeQueue::with_capacity(2);
        assert_eq!(q.try_pop(), None);
        assert_eq!(q.capacity(), 2);
    }
}
