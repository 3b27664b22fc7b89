//! Bounded media queue with a configurable full-queue policy
//!
//! Capture pipelines push into a [`MediaQueue`] from hardware or timer
//! threads and the protocol loops drain it. Audio queues use
//! [`OverflowPolicy::Block`] so no captured audio is ever discarded; video
//! queues use [`OverflowPolicy::DropNewest`] (or `DropOldest`) so a slow
//! consumer bounds latency instead of stalling the camera.
//!
//! Both thread-blocking and async forms of `push`/`pop` are provided. The
//! async forms never park a runtime worker on a condvar.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// What `push` does when the queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for space (until the queue is closed)
    Block,
    /// Discard the incoming item, keep resident items
    DropNewest,
    /// Evict the oldest resident item to make room
    DropOldest,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO shared between a producer and a consumer
pub struct MediaQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Wakes blocked thread consumers
    not_empty: Condvar,
    /// Wakes blocked thread producers
    not_full: Condvar,
    /// Wakes async consumers
    item_ready: Notify,
    /// Wakes async producers
    space_ready: Notify,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

/// Outcome of a single non-blocking push attempt
enum Attempt<T> {
    Done(bool),
    Full(T),
}

impl<T> MediaQueue<T> {
    /// Create a queue. A zero capacity is raised to one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            policy,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a shared queue
    pub fn shared(capacity: usize, policy: OverflowPolicy) -> Arc<Self> {
        Arc::new(Self::new(capacity, policy))
    }

    fn attempt(&self, item: T) -> Attempt<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Attempt::Done(false);
        }

        if inner.items.len() < self.capacity {
            inner.items.push_back(item);
            drop(inner);
            self.pushed.fetch_add(1, Ordering::Relaxed);
            self.wake_consumers();
            return Attempt::Done(true);
        }

        match self.policy {
            OverflowPolicy::Block => Attempt::Full(item),
            OverflowPolicy::DropNewest => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Attempt::Done(false)
            }
            OverflowPolicy::DropOldest => {
                inner.items.pop_front();
                inner.items.push_back(item);
                drop(inner);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.pushed.fetch_add(1, Ordering::Relaxed);
                self.wake_consumers();
                Attempt::Done(true)
            }
        }
    }

    fn wake_consumers(&self) {
        self.not_empty.notify_one();
        self.item_ready.notify_one();
    }

    fn wake_producers(&self) {
        self.not_full.notify_one();
        self.space_ready.notify_one();
    }

    /// Push an item, applying the overflow policy.
    ///
    /// Returns `true` if the item was enqueued. Under `Block` this waits on
    /// the calling thread until space frees up or the queue is closed.
    pub fn push(&self, item: T) -> bool {
        let item = match self.attempt(item) {
            Attempt::Done(enqueued) => return enqueued,
            Attempt::Full(item) => item,
        };

        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return false;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                drop(inner);
                self.pushed.fetch_add(1, Ordering::Relaxed);
                self.wake_consumers();
                return true;
            }
            self.not_full.wait(&mut inner);
        }
    }

    /// Push without ever waiting. Under `Block` a full queue hands the item
    /// back as `Err`; the drop policies behave as in [`push`](Self::push).
    pub fn try_push(&self, item: T) -> Result<(), T> {
        match self.attempt(item) {
            Attempt::Done(_) => Ok(()),
            Attempt::Full(item) => Err(item),
        }
    }

    /// Async form of [`push`](Self::push)
    pub async fn push_async(&self, item: T) -> bool {
        let mut item = item;
        loop {
            let space = self.space_ready.notified();
            match self.attempt(item) {
                Attempt::Done(enqueued) => return enqueued,
                Attempt::Full(back) => item = back,
            }
            space.await;
        }
    }

    /// Pop the oldest item without waiting
    pub fn try_pop(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
            self.wake_producers();
        }
        item
    }

    /// Pop the oldest item, waiting on the calling thread up to `timeout`
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.popped.fetch_add(1, Ordering::Relaxed);
                self.wake_producers();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                let item = inner.items.pop_front();
                drop(inner);
                if item.is_some() {
                    self.popped.fetch_add(1, Ordering::Relaxed);
                    self.wake_producers();
                }
                return item;
            }
        }
    }

    /// Async form of [`pop`](Self::pop)
    pub async fn pop_async(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let ready = self.item_ready.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            if tokio::time::timeout_at(deadline, ready).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Close the queue. Blocked producers and consumers return immediately;
    /// resident items can still be drained.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.item_ready.notify_waiters();
        self.item_ready.notify_one();
        self.space_ready.notify_waiters();
        self.space_ready.notify_one();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Discard every resident item
    pub fn clear(&self) -> usize {
        let cleared = {
            let mut inner = self.inner.lock();
            let n = inner.items.len();
            inner.items.clear();
            n
        };
        if cleared > 0 {
            self.not_full.notify_all();
            self.space_ready.notify_one();
        }
        cleared
    }

    /// Current number of resident items
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            capacity: self.capacity,
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = MediaQueue::new(8, OverflowPolicy::Block);
        for i in 0..8 {
            assert!(queue.push(i));
        }
        let popped: Vec<i32> = (0..8).filter_map(|_| queue.try_pop()).collect();
        assert_eq!(popped, (0..8).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_newest_keeps_resident_items() {
        let queue = MediaQueue::new(2, OverflowPolicy::DropNewest);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));
        assert!(!queue.push(4));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().dropped, 2);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[test]
    fn test_drop_oldest_keeps_freshest() {
        let queue = MediaQueue::new(2, OverflowPolicy::DropOldest);
        for i in 1..=5 {
            assert!(queue.push(i));
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(4));
        assert_eq!(queue.try_pop(), Some(5));
    }

    #[test]
    fn test_blocked_push_resumes_after_pop() {
        let queue = MediaQueue::shared(1, OverflowPolicy::Block);
        assert!(queue.push(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(Duration::from_millis(100)), Some(1));

        assert!(producer.join().unwrap());
        assert_eq!(queue.pop(Duration::from_millis(100)), Some(2));
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let queue = MediaQueue::shared(1, OverflowPolicy::Block);
        assert!(queue.push(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(30));
        queue.close();
        assert!(!producer.join().unwrap());

        // Resident items still drain after close
        assert_eq!(queue.pop(Duration::from_millis(10)), Some(1));
        assert_eq!(queue.pop(Duration::from_secs(5)), None);
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue: MediaQueue<u8> = MediaQueue::new(4, OverflowPolicy::Block);
        let start = Instant::now();
        assert_eq!(queue.pop(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_try_push_hands_item_back_when_full() {
        let queue = MediaQueue::new(1, OverflowPolicy::Block);
        assert!(queue.try_push("a").is_ok());
        assert_eq!(queue.try_push("b"), Err("b"));
    }

    #[tokio::test]
    async fn test_pop_async_wakes_on_push() {
        let queue = MediaQueue::shared(4, OverflowPolicy::Block);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_async(Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.push(7));
        assert_eq!(consumer.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_pop_async_times_out() {
        let queue: MediaQueue<u8> = MediaQueue::new(4, OverflowPolicy::DropNewest);
        assert_eq!(queue.pop_async(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_push_async_waits_for_space() {
        let queue = MediaQueue::shared(1, OverflowPolicy::Block);
        assert!(queue.push_async(1).await);

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push_async(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.try_pop(), Some(1));
        assert!(producer.await.unwrap());
        assert_eq!(queue.try_pop(), Some(2));
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_droppable_queue_never_exceeds_capacity(capacity in 1usize..16, pushes in 0usize..64) {
                let queue = MediaQueue::new(capacity, OverflowPolicy::DropNewest);
                for i in 0..pushes {
                    queue.push(i);
                    prop_assert!(queue.len() <= capacity);
                }
                let stats = queue.stats();
                prop_assert_eq!(stats.pushed + stats.dropped, pushes as u64);
            }
        }
    }
}
