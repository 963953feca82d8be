//! Outbound payloads held back while the connection is not ready.

use std::collections::VecDeque;

/// A payload stamped with its submission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMessage<T> {
    pub sequence: u64,
    pub payload: T,
}

/// FIFO of not-yet-transmitted payloads.
///
/// New submissions go to the back. A payload that was taken out for
/// transmission and failed goes back in front of everything submitted after
/// it, so relative order never changes.
#[derive(Debug)]
pub struct PendingQueue<T> {
    queue: VecDeque<PendingMessage<T>>,
    next_sequence: u64,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            next_sequence: 0,
        }
    }

    /// Assign the next sequence number to `payload` without queueing it.
    pub fn stamp(&mut self, payload: T) -> PendingMessage<T> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        PendingMessage { sequence, payload }
    }

    /// Stamp and append `payload`, returning its sequence number.
    pub fn enqueue(&mut self, payload: T) -> u64 {
        let message = self.stamp(payload);
        let sequence = message.sequence;
        self.queue.push_back(message);
        sequence
    }

    /// Append an already stamped message.
    pub fn push_back(&mut self, message: PendingMessage<T>) {
        self.queue.push_back(message);
    }

    /// Put back a message whose transmission failed.
    pub fn requeue_front(&mut self, message: PendingMessage<T>) {
        let position = self
            .queue
            .iter()
            .position(|queued| queued.sequence > message.sequence)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, message);
    }

    pub fn pop_front(&mut self) -> Option<PendingMessage<T>> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage<T>> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(queue: &PendingQueue<&'static str>) -> Vec<&'static str> {
        queue.iter().map(|m| m.payload).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PendingQueue::new();
        assert_eq!(queue.enqueue("a"), 0);
        assert_eq!(queue.enqueue("b"), 1);
        assert_eq!(queue.enqueue("c"), 2);

        assert_eq!(queue.pop_front().map(|m| m.payload), Some("a"));
        assert_eq!(queue.pop_front().map(|m| m.payload), Some("b"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_failed_message_returns_to_front() {
        let mut queue = PendingQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");

        let first = queue.pop_front().unwrap();
        queue.requeue_front(first);
        assert_eq!(payloads(&queue), vec!["a", "b"]);
    }

    #[test]
    fn test_requeue_keeps_relative_order_with_later_submissions() {
        let mut queue = PendingQueue::new();
        let direct = queue.stamp("direct");
        queue.enqueue("later");

        queue.requeue_front(direct);
        assert_eq!(payloads(&queue), vec!["direct", "later"]);
    }

    #[test]
    fn test_requeue_into_empty_queue() {
        let mut queue = PendingQueue::new();
        let message = queue.stamp("only");
        queue.requeue_front(message);
        assert_eq!(payloads(&queue), vec!["only"]);

        queue.clear();
        assert!(queue.is_empty());
    }
}
