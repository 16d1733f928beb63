//! Single-producer/single-consumer export ring
//!
//! Finished flows move from the cache thread to the output thread
//! through a fixed-capacity lock-free FIFO. The producer blocks when
//! the ring is full; that back-pressure is the designed way a slow
//! collector throttles the packet path. Records are moved by value:
//! once pushed, the cache can no longer touch them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use meter_common::Flow;

pub const DEFAULT_RING_CAPACITY: usize = 16384;

struct Shared {
    queue: ArrayQueue<Flow>,
    closed: AtomicBool,
}

/// Create a connected producer/consumer pair.
pub fn export_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity),
        closed: AtomicBool::new(false),
    });
    (
        RingProducer {
            shared: shared.clone(),
        },
        RingConsumer { shared },
    )
}

/// Cache-side handle. Clones share the ring; any of them may signal
/// close.
#[derive(Clone)]
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Push a finished flow, blocking while the ring is full. Never
    /// drops.
    pub fn push(&self, flow: Flow) {
        let mut flow = flow;
        let backoff = Backoff::new();
        loop {
            match self.shared.queue.push(flow) {
                Ok(()) => return,
                Err(back) => {
                    flow = back;
                    backoff.snooze();
                }
            }
        }
    }

    /// Signal end-of-stream; the consumer drains what is left and
    /// stops.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }
}

/// Output-side handle.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Take the next flow, waiting for the producer. Returns `None`
    /// only after the ring was closed and fully drained.
    pub fn pop(&self) -> Option<Flow> {
        let backoff = Backoff::new();
        loop {
            if let Some(flow) = self.shared.queue.pop() {
                return Some(flow);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                // One more look: the producer may have pushed between
                // the failed pop and the closed check.
                return self.shared.queue.pop();
            }
            backoff.snooze();
        }
    }

    /// Non-blocking take.
    pub fn try_pop(&self) -> Option<Flow> {
        self.shared.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = export_ring(8);
        for sec in 0..5 {
            let mut flow = Flow::default();
            flow.time_first = meter_common::Timestamp::new(sec, 0);
            tx.push(flow);
        }
        for sec in 0..5 {
            assert_eq!(rx.try_pop().unwrap().time_first.sec, sec);
        }
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn test_producer_blocks_until_consumed() {
        let (tx, rx) = export_ring(2);
        tx.push(Flow::default());
        tx.push(Flow::default());

        let producer = thread::spawn(move || {
            // Ring is full; this push blocks until the consumer makes
            // room.
            tx.push(Flow::default());
            tx.close();
        });

        let mut drained = 0;
        while rx.pop().is_some() {
            drained += 1;
        }
        producer.join().unwrap();
        assert_eq!(drained, 3);
    }

    #[test]
    fn test_close_drains_remaining() {
        let (tx, rx) = export_ring(4);
        tx.push(Flow::default());
        tx.push(Flow::default());
        tx.close();

        assert!(rx.pop().is_some());
        assert!(rx.pop().is_some());
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_cross_thread_counts() {
        let (tx, rx) = export_ring(16);
        let n = 10_000u64;
        let producer = thread::spawn(move || {
            for _ in 0..n {
                tx.push(Flow::default());
            }
            tx.close();
        });
        let mut seen = 0u64;
        while rx.pop().is_some() {
            seen += 1;
        }
        producer.join().unwrap();
        assert_eq!(seen, n);
    }
}
