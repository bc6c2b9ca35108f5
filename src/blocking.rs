//! Blocking wrapper over the lock-free queue, spec.md §4.8.

use std::marker::PhantomData;

use crate::queue::{ConcurrentQueue, ConcurrentQueueBuilder};
use crate::semaphore::LightweightSemaphore;
use crate::token::{ConsumerToken, ProducerToken};
use crate::traits::{DefaultQueueTraits, QueueTraits};

/// Composes a [`ConcurrentQueue`] with a counting semaphore whose value
/// equals the number of enqueued-but-not-yet-consumed elements (spec.md §3
/// invariant 7). Every successful enqueue signals; every successful
/// dequeue waits.
pub struct BlockingConcurrentQueue<T, C: QueueTraits = DefaultQueueTraits> {
    queue: ConcurrentQueue<T, C>,
    sema: LightweightSemaphore<C>,
}

impl<T, C: QueueTraits> BlockingConcurrentQueue<T, C> {
    pub fn new() -> Self {
        Self::with_capacity(6 * C::BLOCK_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BlockingConcurrentQueue {
            queue: ConcurrentQueue::with_capacity(capacity),
            sema: LightweightSemaphore::new(),
        }
    }

    pub fn builder() -> BlockingConcurrentQueueBuilder<T, C> {
        BlockingConcurrentQueueBuilder::new()
    }

    pub fn create_producer_token(&self) -> ProducerToken<T, C> {
        self.queue.create_producer_token()
    }

    pub fn create_consumer_token(&self) -> ConsumerToken<T, C> {
        self.queue.create_consumer_token()
    }

    pub fn enqueue(&self, item: T) -> bool {
        let ok = self.queue.enqueue(item);
        if ok {
            self.sema.signal(1);
        }
        ok
    }

    pub fn try_enqueue(&self, item: T) -> bool {
        let ok = self.queue.try_enqueue(item);
        if ok {
            self.sema.signal(1);
        }
        ok
    }

    pub fn enqueue_with_token(&self, token: &ProducerToken<T, C>, item: T) -> bool {
        let ok = self.queue.enqueue_with_token(token, item);
        if ok {
            self.sema.signal(1);
        }
        ok
    }

    pub fn try_enqueue_with_token(&self, token: &ProducerToken<T, C>, item: T) -> bool {
        let ok = self.queue.try_enqueue_with_token(token, item);
        if ok {
            self.sema.signal(1);
        }
        ok
    }

    pub fn enqueue_bulk(&self, items: Vec<T>) -> bool {
        let n = items.len();
        let ok = self.queue.enqueue_bulk(items);
        if ok && n > 0 {
            self.sema.signal(n as isize);
        }
        ok
    }

    pub fn try_enqueue_bulk(&self, items: Vec<T>) -> bool {
        let n = items.len();
        let ok = self.queue.try_enqueue_bulk(items);
        if ok && n > 0 {
            self.sema.signal(n as isize);
        }
        ok
    }

    pub fn enqueue_bulk_with_token(&self, token: &ProducerToken<T, C>, items: Vec<T>) -> bool {
        let n = items.len();
        let ok = self.queue.enqueue_bulk_with_token(token, items);
        if ok && n > 0 {
            self.sema.signal(n as isize);
        }
        ok
    }

    pub fn try_enqueue_bulk_with_token(&self, token: &ProducerToken<T, C>, items: Vec<T>) -> bool {
        let n = items.len();
        let ok = self.queue.try_enqueue_bulk_with_token(token, items);
        if ok && n > 0 {
            self.sema.signal(n as isize);
        }
        ok
    }

    /// Blocks indefinitely. Spins on `try_dequeue` after waking because the
    /// producer's signal races the rotation heuristic locating the exact
    /// element (spec.md §4.8 "Blocking wrapper composition").
    pub fn wait_dequeue(&self) -> T {
        self.sema.wait();
        loop {
            if let Some(v) = self.queue.try_dequeue() {
                return v;
            }
            std::hint::spin_loop();
        }
    }

    /// `timeout_usecs < 0` indefinite, `== 0` non-blocking, `> 0` bounded
    /// (spec.md §4.8 "Timeout semantics").
    pub fn wait_dequeue_timed(&self, timeout_usecs: i64) -> Option<T> {
        if !self.sema.wait_for(timeout_usecs) {
            return None;
        }
        loop {
            if let Some(v) = self.queue.try_dequeue() {
                return Some(v);
            }
            std::hint::spin_loop();
        }
    }

    pub fn wait_dequeue_with_token(&self, token: &mut ConsumerToken<T, C>) -> T {
        self.sema.wait();
        loop {
            if let Some(v) = self.queue.try_dequeue_with_token(token) {
                return v;
            }
            std::hint::spin_loop();
        }
    }

    pub fn wait_dequeue_timed_with_token(
        &self,
        token: &mut ConsumerToken<T, C>,
        timeout_usecs: i64,
    ) -> Option<T> {
        if !self.sema.wait_for(timeout_usecs) {
            return None;
        }
        loop {
            if let Some(v) = self.queue.try_dequeue_with_token(token) {
                return Some(v);
            }
            std::hint::spin_loop();
        }
    }

    pub fn wait_dequeue_bulk(&self, max: usize) -> Vec<T> {
        self.wait_dequeue_bulk_timed(max, -1)
    }

    pub fn wait_dequeue_bulk_timed(&self, max: usize, timeout_usecs: i64) -> Vec<T> {
        if max == 0 {
            return Vec::new();
        }
        let got = self.sema.wait_many(max, timeout_usecs);
        if got == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(got);
        while out.len() < got {
            out.extend(self.queue.try_dequeue_bulk(got - out.len()));
        }
        out
    }

    pub fn wait_dequeue_bulk_with_token(&self, token: &mut ConsumerToken<T, C>, max: usize) -> Vec<T> {
        self.wait_dequeue_bulk_timed_with_token(token, max, -1)
    }

    pub fn wait_dequeue_bulk_timed_with_token(
        &self,
        token: &mut ConsumerToken<T, C>,
        max: usize,
        timeout_usecs: i64,
    ) -> Vec<T> {
        if max == 0 {
            return Vec::new();
        }
        let got = self.sema.wait_many(max, timeout_usecs);
        if got == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(got);
        while out.len() < got {
            out.extend(self.queue.try_dequeue_bulk_with_token(token, got - out.len()));
        }
        out
    }

    pub fn try_dequeue(&self) -> Option<T> {
        if self.sema.try_wait() {
            loop {
                if let Some(v) = self.queue.try_dequeue() {
                    return Some(v);
                }
                std::hint::spin_loop();
            }
        }
        None
    }

    pub fn size_approx(&self) -> usize {
        self.queue.size_approx()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_lock_free() -> bool {
        ConcurrentQueue::<T, C>::is_lock_free()
    }
}

impl<T, C: QueueTraits> Default for BlockingConcurrentQueue<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BlockingConcurrentQueueBuilder<T, C: QueueTraits = DefaultQueueTraits> {
    inner: ConcurrentQueueBuilder<T, C>,
    _config: PhantomData<C>,
}

impl<T, C: QueueTraits> BlockingConcurrentQueueBuilder<T, C> {
    pub fn new() -> Self {
        BlockingConcurrentQueueBuilder {
            inner: ConcurrentQueueBuilder::new(),
            _config: PhantomData,
        }
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.inner = self.inner.with_initial_capacity(capacity);
        self
    }

    pub fn build(self) -> BlockingConcurrentQueue<T, C> {
        BlockingConcurrentQueue {
            queue: self.inner.build(),
            sema: LightweightSemaphore::new(),
        }
    }
}

impl<T, C: QueueTraits> Default for BlockingConcurrentQueueBuilder<T, C> {
    fn default() -> Self {
        Self::new()
    }
}
