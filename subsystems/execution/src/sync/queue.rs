//! # Wait Queues
//!
//! FIFO queue of blocked threads.

use crate::ThreadId;
use alloc::collections::VecDeque;

/// FIFO queue of blocked threads
#[derive(Debug, Default)]
pub struct WaitQueue {
    queue: VecDeque<ThreadId>,
}

impl WaitQueue {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Append a thread
    pub fn push(&mut self, thread: ThreadId) {
        self.queue.push_back(thread);
    }

    /// Remove the oldest thread
    pub fn pop(&mut self) -> Option<ThreadId> {
        self.queue.pop_front()
    }

    /// Oldest thread, without removing it
    pub fn peek(&self) -> Option<ThreadId> {
        self.queue.front().copied()
    }

    /// Number of queued threads
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Is `thread` queued?
    pub fn contains(&self, thread: ThreadId) -> bool {
        self.queue.contains(&thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = WaitQueue::new();
        for raw in [3, 1, 2] {
            queue.push(ThreadId::new(raw));
        }
        assert_eq!(queue.len(), 3);
        assert!(queue.contains(ThreadId::new(1)));
        assert_eq!(queue.peek(), Some(ThreadId::new(3)));

        assert_eq!(queue.pop(), Some(ThreadId::new(3)));
        assert_eq!(queue.pop(), Some(ThreadId::new(1)));
        assert_eq!(queue.pop(), Some(ThreadId::new(2)));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }
}
