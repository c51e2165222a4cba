//! The priority-ordered send queue.
//!
//! Unbounded and concurrent: any context may push, the engine worker blocks
//! on take. Ordering is by [`MessagePriority`] with FIFO among equals; the
//! tie-break is a sequence number stamped at enqueue time, so the ordering is
//! a pure function of the queue contents. The queue itself never drops a
//! message.

use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;
use zwave_protocol::{MessagePriority, SerialMessage};

/// A queued message plus its enqueue sequence number.
#[derive(Debug)]
struct Pending {
    seq: u64,
    message: SerialMessage,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap pops the greatest element; invert so that the most
        // urgent priority, then the oldest sequence number, comes out first.
        other
            .message
            .priority
            .cmp(&self.message.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<Pending>,
    next_seq: u64,
}

/// Concurrent priority queue of pending outbound messages.
pub struct SendQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl SendQueue {
    /// Create an empty queue with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        SendQueue {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a message. Never blocks.
    pub fn push(&self, message: SerialMessage) {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Pending { seq, message });
        debug!("enqueueing message, queue length = {}", inner.heap.len());
        self.available.notify_one();
    }

    /// Take the most urgent message, waiting up to `timeout` for one to
    /// arrive. Returns `None` on timeout so callers can poll a stop flag.
    pub fn take_timeout(&self, timeout: Duration) -> Option<SerialMessage> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(pending) = inner.heap.pop() {
                return Some(pending.message);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any `Low`-priority message is still pending. Used by the
    /// dead-node check: a queued sleeping-node ping means nothing can be
    /// concluded yet.
    pub fn has_low_priority(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .heap
            .iter()
            .any(|p| p.message.priority == MessagePriority::Low)
    }

    /// Drop every queued message.
    pub fn clear(&self) {
        self.inner.lock().unwrap().heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zwave_protocol::MessageClass;

    fn msg(priority: MessagePriority, tag: u8) -> SerialMessage {
        SerialMessage::request(MessageClass::SendData, priority).with_payload(vec![tag])
    }

    fn take(queue: &SendQueue) -> SerialMessage {
        queue
            .take_timeout(Duration::from_secs(1))
            .expect("queue should yield a message")
    }

    #[test]
    fn test_priority_order() {
        let queue = SendQueue::with_capacity(8);
        queue.push(msg(MessagePriority::Low, 0));
        queue.push(msg(MessagePriority::Get, 1));
        queue.push(msg(MessagePriority::High, 2));
        queue.push(msg(MessagePriority::Set, 3));

        assert_eq!(take(&queue).payload, vec![2]);
        assert_eq!(take(&queue).payload, vec![3]);
        assert_eq!(take(&queue).payload, vec![1]);
        assert_eq!(take(&queue).payload, vec![0]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = SendQueue::with_capacity(8);
        for tag in 0..5 {
            queue.push(msg(MessagePriority::Get, tag));
        }
        for tag in 0..5 {
            assert_eq!(take(&queue).payload, vec![tag]);
        }
    }

    #[test]
    fn test_take_timeout_expires_empty() {
        let queue = SendQueue::with_capacity(8);
        assert!(queue.take_timeout(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn test_take_wakes_on_push() {
        let queue = Arc::new(SendQueue::with_capacity(8));
        let pusher = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            pusher.push(msg(MessagePriority::High, 42));
        });
        let taken = queue.take_timeout(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(taken.unwrap().payload, vec![42]);
    }

    #[test]
    fn test_low_priority_probe() {
        let queue = SendQueue::with_capacity(8);
        assert!(!queue.has_low_priority());
        queue.push(msg(MessagePriority::High, 0));
        assert!(!queue.has_low_priority());
        queue.push(msg(MessagePriority::Low, 1));
        assert!(queue.has_low_priority());
        queue.clear();
        assert!(queue.is_empty());
    }
}
