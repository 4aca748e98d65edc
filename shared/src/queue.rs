//! Bounded blocking queue decoupling network threads from processing threads
//!
//! A thin layer over a bounded crossbeam channel. Producers block while the
//! queue is full and consumers block while it is empty, which is the only
//! backpressure mechanism between a connection and the router. The router
//! itself never waits: it uses [`BoundedQueue::try_enqueue`].
//!
//! Closing the queue wakes every waiter: pending and future enqueues are
//! rejected, consumers drain what is left and then observe `None`. The close
//! signal is a second, never-used channel whose sender is dropped by
//! [`BoundedQueue::close`], so every `select!` waiting on it fires at once.

use crate::error::{QueueClosed, TryEnqueueError};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError, TrySendError};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub struct BoundedQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    closer: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        let (closer, closed) = bounded(0);

        Self {
            sender,
            receiver,
            closer: Mutex::new(Some(closer)),
            closed,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.closed.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Appends `item`, blocking while the queue is full.
    ///
    /// Fails only when the queue is closed, handing the item back.
    pub fn enqueue(&self, item: T) -> Result<(), QueueClosed<T>> {
        if self.is_closed() {
            return Err(QueueClosed(item));
        }
        if self.capacity == 0 {
            // Nothing can ever be stored, so only a close ends the wait
            let _ = self.closed.recv();
            return Err(QueueClosed(item));
        }

        select! {
            send(self.sender, item) -> sent => sent.map_err(|e| QueueClosed(e.into_inner())),
            recv(self.closed) -> _ => Err(QueueClosed(item)),
        }
    }

    /// Appends `item` only if there is room right now
    pub fn try_enqueue(&self, item: T) -> Result<(), TryEnqueueError<T>> {
        if self.is_closed() {
            return Err(TryEnqueueError::Closed(item));
        }
        if self.capacity == 0 {
            return Err(TryEnqueueError::Full(item));
        }

        self.sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => TryEnqueueError::Full(item),
            TrySendError::Disconnected(item) => TryEnqueueError::Closed(item),
        })
    }

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn dequeue(&self) -> Option<T> {
        select! {
            recv(self.receiver) -> item => item.ok(),
            recv(self.closed) -> _ => self.receiver.try_recv().ok(),
        }
    }

    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        select! {
            recv(self.receiver) -> item => item.ok(),
            recv(self.closed) -> _ => self.receiver.try_recv().ok(),
            default(timeout) => None,
        }
    }

    /// Never waits: returns `None` if nothing is queued
    pub fn try_dequeue(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Drains the items queued at the time of the call, in FIFO order
    pub fn dequeue_all(&self) -> Vec<T> {
        let queued = self.receiver.len();
        self.receiver.try_iter().take(queued).collect()
    }

    pub fn close(&self) {
        self.closer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("occupied", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(4);
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        queue.enqueue(3).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wraps_around_slots() {
        let queue = BoundedQueue::new(2);
        for i in 0..10 {
            queue.enqueue(i).unwrap();
            assert_eq!(queue.dequeue(), Some(i));
        }
    }

    #[test]
    fn test_dequeue_all_drains_in_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }

        assert_eq!(queue.dequeue_all(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
        assert!(queue.dequeue_all().is_empty());
    }

    #[test]
    fn test_try_dequeue_on_empty_queue() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(2);
        assert_eq!(queue.try_dequeue(), None);

        queue.enqueue(7).unwrap();
        assert_eq!(queue.try_dequeue(), Some(7));
    }

    #[test]
    fn test_try_enqueue_never_waits() {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.try_enqueue(1), Ok(()));
        assert_eq!(queue.try_enqueue(2), Err(TryEnqueueError::Full(2)));

        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.try_enqueue(3), Ok(()));

        queue.close();
        assert_eq!(queue.try_enqueue(4), Err(TryEnqueueError::Closed(4)));
        assert_eq!(queue.dequeue(), Some(3));
    }

    #[test]
    fn test_dequeue_timeout_expires() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(1);
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_capacity_blocks_extra_producers() {
        let queue = Arc::new(BoundedQueue::new(2));

        let producers: Vec<_> = (0..3)
            .map(|i| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.enqueue(i).unwrap())
            })
            .collect();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(queue.len(), 2);

        let mut seen = vec![queue.dequeue().unwrap()];
        for producer in producers {
            producer.join().unwrap();
        }
        seen.extend(queue.dequeue_all());
        seen.sort();

        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_blocked_consumer_wakes_on_enqueue() {
        let queue = Arc::new(BoundedQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue("hello").unwrap();

        assert_eq!(consumer.join().unwrap(), Some("hello"));
    }

    #[test]
    fn test_close_wakes_blocked_threads() {
        let full = Arc::new(BoundedQueue::new(1));
        full.enqueue(1).unwrap();
        let producer = {
            let full = Arc::clone(&full);
            thread::spawn(move || full.enqueue(2))
        };

        let empty: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(1));
        let consumer = {
            let empty = Arc::clone(&empty);
            thread::spawn(move || empty.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        full.close();
        empty.close();

        assert_eq!(producer.join().unwrap(), Err(QueueClosed(2)));
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_closed_queue_drains_remaining_items() {
        let queue = BoundedQueue::new(3);
        queue.enqueue('a').unwrap();
        queue.enqueue('b').unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.enqueue('c'), Err(QueueClosed('c')));
        assert_eq!(queue.dequeue(), Some('a'));
        assert_eq!(queue.dequeue(), Some('b'));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_zero_capacity_rejects_after_close() {
        let queue = BoundedQueue::new(0);
        queue.close();
        assert_eq!(queue.enqueue(5), Err(QueueClosed(5)));
        assert_eq!(queue.try_enqueue(6), Err(TryEnqueueError::Closed(6)));
        assert_eq!(queue.try_dequeue(), None);
    }
}
