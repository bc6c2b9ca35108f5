//! Producer and consumer tokens, spec.md §3 "Producer token"/"Consumer
//! token" and §4.7 rotation.

use std::sync::atomic::Ordering;

use crate::producer::explicit::ExplicitProducer;
use crate::queue::ConcurrentQueue;
use crate::registry::ProducerNode;
use crate::traits::QueueTraits;

/// Binds the holder to one explicit sub-queue. Dropping the token
/// inactivates the sub-queue rather than destroying it, making it eligible
/// for reuse by a later token (spec.md §3).
pub struct ProducerToken<T, C: QueueTraits = crate::traits::DefaultQueueTraits> {
    pub(crate) producer: *mut ExplicitProducer<T, C>,
}

unsafe impl<T: Send, C: QueueTraits> Send for ProducerToken<T, C> {}

impl<T, C: QueueTraits> ProducerToken<T, C> {
    pub(crate) fn new(queue: &ConcurrentQueue<T, C>) -> Self {
        ProducerToken {
            producer: queue.registry().get_or_create_explicit(),
        }
    }

    /// `false` only if the backing producer could not be allocated
    /// (spec.md §7 `TokenInvalid`); operations through an invalid token are
    /// no-ops returning false.
    pub fn valid(&self) -> bool {
        !self.producer.is_null()
    }

    pub(crate) fn producer(&self) -> Option<&ExplicitProducer<T, C>> {
        if self.producer.is_null() {
            None
        } else {
            Some(unsafe { &*self.producer })
        }
    }
}

impl<T, C: QueueTraits> Drop for ProducerToken<T, C> {
    fn drop(&mut self) {
        if let Some(p) = self.producer() {
            p.core.inactive.store(true, Ordering::Release);
        }
    }
}

/// Distributes one consumer fairly across a queue's explicit producers by
/// periodically rotating which producer it reads from next (spec.md §4.7).
pub struct ConsumerToken<T, C: QueueTraits = crate::traits::DefaultQueueTraits> {
    queue: *const ConcurrentQueue<T, C>,
    initial_offset: usize,
    last_known_global_offset: usize,
    items_consumed_from_current: usize,
    current_producer: *mut ProducerNode<T, C>,
}

unsafe impl<T: Send, C: QueueTraits> Send for ConsumerToken<T, C> {}

impl<T, C: QueueTraits> ConsumerToken<T, C> {
    pub(crate) fn new(queue: &ConcurrentQueue<T, C>) -> Self {
        let initial_offset = queue.registry().assign_consumer_id();
        ConsumerToken {
            queue,
            initial_offset,
            last_known_global_offset: initial_offset,
            items_consumed_from_current: 0,
            current_producer: std::ptr::null_mut(),
        }
    }

    fn queue(&self) -> &ConcurrentQueue<T, C> {
        unsafe { &*self.queue }
    }

    /// Advances `current_producer` if the global rotation offset has moved
    /// on since this token last checked, then returns the node to read from.
    pub(crate) fn rotate_if_needed(&mut self) -> *mut ProducerNode<T, C> {
        let registry = self.queue().registry();
        let global = registry.global_explicit_consumer_offset.load(Ordering::Relaxed);
        if self.current_producer.is_null() {
            self.current_producer = registry.head_node();
            self.last_known_global_offset = global;
            return self.current_producer;
        }
        if global != self.last_known_global_offset {
            let steps = global.wrapping_sub(self.last_known_global_offset);
            self.current_producer = registry.step(self.current_producer, steps);
            self.last_known_global_offset = global;
            self.items_consumed_from_current = 0;
        }
        self.current_producer
    }

    /// Called after consuming `count` items through this token; advances
    /// the queue-wide rotation offset once the quota is exceeded.
    pub(crate) fn record_consumed(&mut self, count: usize) {
        self.items_consumed_from_current += count;
        if self.items_consumed_from_current >= C::EXPLICIT_CONSUMER_CONSUMPTION_QUOTA_BEFORE_ROTATE {
            self.queue()
                .registry()
                .global_explicit_consumer_offset
                .fetch_add(1, Ordering::Relaxed);
            self.items_consumed_from_current = 0;
        }
    }

    pub fn initial_offset(&self) -> usize {
        self.initial_offset
    }
}
