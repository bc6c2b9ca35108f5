//! The queue facade, spec.md §4.7, and its builder (SPEC_FULL.md §4.10
//! "Builder for queue construction").

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize};

use crate::hash::current_thread_id;
use crate::pool::BlockPool;
use crate::registry::{ProducerSlot, ProducerRegistry};
use crate::token::{ConsumerToken, ProducerToken};
use crate::traits::{DefaultQueueTraits, QueueTraits};

/// A lock-free, multi-producer multi-consumer queue. Producers attach
/// either implicitly (by thread identity, on first use) or explicitly (via
/// a held [`ProducerToken`]); consumers read with or without a
/// [`ConsumerToken`]. See the crate root docs for the full operation set.
pub struct ConcurrentQueue<T, C: QueueTraits = DefaultQueueTraits> {
    pool: Box<BlockPool<T, C>>,
    registry: Box<ProducerRegistry<T, C>>,
    _config: PhantomData<C>,
}

unsafe impl<T: Send, C: QueueTraits> Send for ConcurrentQueue<T, C> {}
unsafe impl<T: Send, C: QueueTraits> Sync for ConcurrentQueue<T, C> {}

impl<T, C: QueueTraits> ConcurrentQueue<T, C> {
    pub fn new() -> Self {
        Self::with_capacity(6 * C::BLOCK_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let initial_blocks = ((capacity + C::BLOCK_SIZE - 1) / C::BLOCK_SIZE).max(1);
        let pool = Box::new(BlockPool::new(initial_blocks));
        let pool_ptr: *const BlockPool<T, C> = pool.as_ref();
        let registry = Box::new(ProducerRegistry::new(pool_ptr));
        ConcurrentQueue {
            pool,
            registry,
            _config: PhantomData,
        }
    }

    pub fn builder() -> ConcurrentQueueBuilder<T, C> {
        ConcurrentQueueBuilder::new()
    }

    pub(crate) fn registry(&self) -> &ProducerRegistry<T, C> {
        &self.registry
    }

    pub fn create_producer_token(&self) -> ProducerToken<T, C> {
        ProducerToken::new(self)
    }

    pub fn create_consumer_token(&self) -> ConsumerToken<T, C> {
        ConsumerToken::new(self)
    }

    fn enqueue_impl(&self, item: T, allow_alloc: bool) -> bool {
        match self.registry.get_or_create_implicit(current_thread_id()) {
            Some(p) => unsafe { (*p).enqueue(item, allow_alloc).is_ok() },
            None => false,
        }
    }

    /// May allocate to make room. Routes to the calling thread's implicit
    /// producer, creating it lazily.
    pub fn enqueue(&self, item: T) -> bool {
        self.enqueue_impl(item, true)
    }

    /// Never allocates; fails immediately if the sub-queue is full.
    pub fn try_enqueue(&self, item: T) -> bool {
        self.enqueue_impl(item, false)
    }

    pub fn enqueue_with_token(&self, token: &ProducerToken<T, C>, item: T) -> bool {
        match token.producer() {
            Some(p) => p.enqueue(item, true).is_ok(),
            None => false,
        }
    }

    pub fn try_enqueue_with_token(&self, token: &ProducerToken<T, C>, item: T) -> bool {
        match token.producer() {
            Some(p) => p.enqueue(item, false).is_ok(),
            None => false,
        }
    }

    fn enqueue_bulk_impl(&self, items: Vec<T>, allow_alloc: bool) -> bool {
        if items.is_empty() {
            return true;
        }
        match self.registry.get_or_create_implicit(current_thread_id()) {
            Some(p) => unsafe { (*p).enqueue_bulk(items, allow_alloc).is_ok() },
            None => false,
        }
    }

    pub fn enqueue_bulk(&self, items: Vec<T>) -> bool {
        self.enqueue_bulk_impl(items, true)
    }

    pub fn try_enqueue_bulk(&self, items: Vec<T>) -> bool {
        self.enqueue_bulk_impl(items, false)
    }

    pub fn enqueue_bulk_with_token(&self, token: &ProducerToken<T, C>, items: Vec<T>) -> bool {
        if items.is_empty() {
            return true;
        }
        match token.producer() {
            Some(p) => p.enqueue_bulk(items, true).is_ok(),
            None => false,
        }
    }

    pub fn try_enqueue_bulk_with_token(&self, token: &ProducerToken<T, C>, items: Vec<T>) -> bool {
        if items.is_empty() {
            return true;
        }
        match token.producer() {
            Some(p) => p.enqueue_bulk(items, false).is_ok(),
            None => false,
        }
    }

    /// Scans the producer list heuristically: tries the (up to) three
    /// largest non-empty sub-queues first, falling back to a full sweep in
    /// list order (spec.md §4.7).
    pub fn try_dequeue(&self) -> Option<T> {
        let mut top: [(*const ProducerSlot<T, C>, usize); 3] =
            [(std::ptr::null(), 0); 3];
        self.registry.for_each(|slot| {
            let size = slot.size_approx();
            let ptr = slot as *const _;
            for i in 0..3 {
                if size > top[i].1 {
                    for j in (i + 1..3).rev() {
                        top[j] = top[j - 1];
                    }
                    top[i] = (ptr, size);
                    break;
                }
            }
        });
        for (ptr, size) in top {
            if ptr.is_null() || size == 0 {
                continue;
            }
            if let Some(v) = unsafe { (*ptr).dequeue() } {
                return Some(v);
            }
        }
        let mut result = None;
        self.registry.for_each(|slot| {
            if result.is_none() {
                result = slot.dequeue();
            }
        });
        result
    }

    /// Rotation-based dequeue: spreads one consumer's reads fairly across
    /// explicit producers (spec.md §4.7 "Dequeue with token").
    pub fn try_dequeue_with_token(&self, token: &mut ConsumerToken<T, C>) -> Option<T> {
        let node = token.rotate_if_needed();
        if node.is_null() {
            return None;
        }
        let result = self.registry.slot_of(node).dequeue();
        if result.is_some() {
            token.record_consumed(1);
        }
        result
    }

    pub fn try_dequeue_bulk(&self, max: usize) -> Vec<T> {
        let mut out = Vec::new();
        if max == 0 {
            return out;
        }
        self.registry.for_each(|slot| {
            if out.len() >= max {
                return;
            }
            slot.dequeue_bulk(max - out.len(), &mut out);
        });
        out
    }

    pub fn try_dequeue_bulk_with_token(&self, token: &mut ConsumerToken<T, C>, max: usize) -> Vec<T> {
        let mut out = Vec::new();
        if max == 0 {
            return out;
        }
        let node = token.rotate_if_needed();
        if node.is_null() {
            return out;
        }
        let got = self.registry.slot_of(node).dequeue_bulk(max, &mut out);
        if got > 0 {
            token.record_consumed(got);
        }
        out
    }

    /// Exact only at quiescence (spec.md §8 invariant 3); a heuristic
    /// snapshot otherwise.
    pub fn size_approx(&self) -> usize {
        let mut total = 0;
        self.registry.for_each(|slot| total += slot.size_approx());
        total
    }

    pub fn is_empty(&self) -> bool {
        self.size_approx() == 0
    }

    /// The element count the initial block pool was sized for, before any
    /// growth (supplements spec.md §6, see SPEC_FULL.md §6).
    pub fn capacity(&self) -> usize {
        self.pool.initial_block_count() * C::BLOCK_SIZE
    }

    /// Whether every atomic type this queue relies on is lock-free on the
    /// current platform (spec.md §4.7 "Lock-freedom query").
    pub fn is_lock_free() -> bool {
        AtomicUsize::new(0).is_lock_free()
            && AtomicBool::new(false).is_lock_free()
            && AtomicPtr::<u8>::new(std::ptr::null_mut()).is_lock_free()
    }
}

impl<T, C: QueueTraits> Default for ConcurrentQueue<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: QueueTraits> Drop for ConcurrentQueue<T, C> {
    fn drop(&mut self) {
        while self.try_dequeue().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_threaded_round_trip() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
        assert!(q.enqueue(5));
        assert_eq!(q.try_dequeue(), Some(5));
    }

    #[test]
    fn bulk_round_trip() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
        assert!(q.enqueue_bulk(vec![1, 2, 3, 4]));
        let out = q.try_dequeue_bulk(4);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn try_enqueue_matches_enqueue_when_no_alloc_needed() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::with_capacity(64);
        assert!(q.try_enqueue(1));
        assert_eq!(q.try_dequeue(), Some(1));
    }

    #[test]
    fn dequeue_from_empty_returns_none() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn bulk_dequeue_zero_is_a_no_op() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
        q.enqueue(1);
        assert_eq!(q.try_dequeue_bulk(0), Vec::<i32>::new());
        assert_eq!(q.size_approx(), 1);
    }

    #[test]
    fn bulk_enqueue_zero_is_a_no_op() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
        assert!(q.enqueue_bulk(Vec::new()));
        assert!(q.is_empty());
    }

    #[test]
    fn size_approx_exact_at_quiescence() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
        for i in 0..50 {
            q.enqueue(i);
        }
        assert_eq!(q.size_approx(), 50);
        for _ in 0..20 {
            q.try_dequeue();
        }
        assert_eq!(q.size_approx(), 30);
    }

    #[test]
    fn explicit_token_round_trip() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
        let token = q.create_producer_token();
        assert!(token.valid());
        assert!(q.enqueue_with_token(&token, 7));
        assert_eq!(q.try_dequeue(), Some(7));
    }

    #[test]
    fn capacity_reports_initial_block_sizing() {
        let q: ConcurrentQueue<i32> = ConcurrentQueue::with_capacity(128);
        assert!(q.capacity() >= 128);
    }

    #[test]
    fn drop_drains_without_leaking_panics() {
        let q: ConcurrentQueue<String> = ConcurrentQueue::new();
        for i in 0..100 {
            q.enqueue(format!("item-{i}"));
        }
        drop(q);
    }
}

pub struct ConcurrentQueueBuilder<T, C: QueueTraits = DefaultQueueTraits> {
    initial_capacity: usize,
    _config: PhantomData<(T, C)>,
}

impl<T, C: QueueTraits> ConcurrentQueueBuilder<T, C> {
    pub fn new() -> Self {
        ConcurrentQueueBuilder {
            initial_capacity: 6 * C::BLOCK_SIZE,
            _config: PhantomData,
        }
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn build(self) -> ConcurrentQueue<T, C> {
        ConcurrentQueue::with_capacity(self.initial_capacity)
    }
}

impl<T, C: QueueTraits> Default for ConcurrentQueueBuilder<T, C> {
    fn default() -> Self {
        Self::new()
    }
}
