//! Producer registry: the producer list plus the implicit-producer thread
//! hash, spec.md §4.6.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::hash::murmur3_finalizer;
use crate::pool::BlockPool;
use crate::producer::explicit::ExplicitProducer;
use crate::producer::implicit::ImplicitProducer;
use crate::producer::{ProducerKind, SubqueueCore};
use crate::traits::QueueTraits;

const INVALID_THREAD_ID: u64 = 0;
const REUSABLE_THREAD_ID: u64 = u64::MAX;

pub(crate) enum ProducerSlot<T, C: QueueTraits> {
    Explicit(Box<ExplicitProducer<T, C>>),
    Implicit(Box<ImplicitProducer<T, C>>),
}

impl<T, C: QueueTraits> ProducerSlot<T, C> {
    fn core(&self) -> &SubqueueCore {
        match self {
            ProducerSlot::Explicit(p) => &p.core,
            ProducerSlot::Implicit(p) => &p.core,
        }
    }

    pub(crate) fn kind(&self) -> ProducerKind {
        match self {
            ProducerSlot::Explicit(_) => ProducerKind::Explicit,
            ProducerSlot::Implicit(_) => ProducerKind::Implicit,
        }
    }

    pub(crate) fn size_approx(&self) -> usize {
        self.core().size_approx()
    }

    pub(crate) fn dequeue(&self) -> Option<T> {
        match self {
            ProducerSlot::Explicit(p) => p.dequeue(),
            ProducerSlot::Implicit(p) => p.dequeue(),
        }
    }

    pub(crate) fn dequeue_bulk(&self, max: usize, out: &mut Vec<T>) -> usize {
        match self {
            ProducerSlot::Explicit(p) => p.dequeue_bulk(max, out),
            ProducerSlot::Implicit(p) => p.dequeue_bulk(max, out),
        }
    }
}

/// One producer-list node. Never freed while the queue lives (spec.md §3
/// invariant 5); `inactive` marks it eligible for recycling by a later
/// token/thread of matching kind (spec.md §4.6 "Recycling").
pub(crate) struct ProducerNode<T, C: QueueTraits> {
    pub(crate) slot: ProducerSlot<T, C>,
    next: AtomicPtr<ProducerNode<T, C>>,
}

struct HashEntry<T, C: QueueTraits> {
    key: AtomicU64,
    producer: AtomicPtr<ImplicitProducer<T, C>>,
}

struct ImplicitHashHeader<T, C: QueueTraits> {
    capacity: usize,
    entries: Box<[HashEntry<T, C>]>,
    used: CachePadded<AtomicUsize>,
    prev: AtomicPtr<ImplicitHashHeader<T, C>>,
}

impl<T, C: QueueTraits> ImplicitHashHeader<T, C> {
    fn new(capacity: usize) -> Box<Self> {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || HashEntry {
            key: AtomicU64::new(INVALID_THREAD_ID),
            producer: AtomicPtr::new(ptr::null_mut()),
        });
        Box::new(ImplicitHashHeader {
            capacity,
            entries: entries.into_boxed_slice(),
            used: CachePadded::new(AtomicUsize::new(0)),
            prev: AtomicPtr::new(ptr::null_mut()),
        })
    }
}

/// Spec.md §3 "Producer registry": a CAS-push list of every sub-queue ever
/// created plus the implicit-producer thread hash. Implemented as a
/// Treiber-stack-style head-insertion list rather than literal tail-append
/// (see DESIGN.md / SPEC_FULL.md §9 — no invariant depends on list order).
pub(crate) struct ProducerRegistry<T, C: QueueTraits> {
    head: AtomicPtr<ProducerNode<T, C>>,
    producer_count: CachePadded<AtomicUsize>,
    implicit_hash: AtomicPtr<ImplicitHashHeader<T, C>>,
    hash_resizing: AtomicBool,
    pub(crate) global_explicit_consumer_offset: CachePadded<AtomicUsize>,
    next_consumer_id: AtomicUsize,
    pool: *const BlockPool<T, C>,
    _config: PhantomData<C>,
}

unsafe impl<T: Send, C: QueueTraits> Send for ProducerRegistry<T, C> {}
unsafe impl<T: Send, C: QueueTraits> Sync for ProducerRegistry<T, C> {}

impl<T, C: QueueTraits> ProducerRegistry<T, C> {
    pub(crate) fn new(pool: *const BlockPool<T, C>) -> Self {
        let initial_hash_capacity = C::INITIAL_IMPLICIT_PRODUCER_HASH_SIZE.max(1);
        ProducerRegistry {
            head: AtomicPtr::new(ptr::null_mut()),
            producer_count: CachePadded::new(AtomicUsize::new(0)),
            implicit_hash: AtomicPtr::new(Box::into_raw(ImplicitHashHeader::new(initial_hash_capacity))),
            hash_resizing: AtomicBool::new(false),
            global_explicit_consumer_offset: CachePadded::new(AtomicUsize::new(0)),
            next_consumer_id: AtomicUsize::new(0),
            pool,
            _config: PhantomData,
        }
    }

    pub(crate) fn producer_count(&self) -> usize {
        self.producer_count.load(Ordering::Relaxed)
    }

    pub(crate) fn assign_consumer_id(&self) -> usize {
        self.next_consumer_id.fetch_add(1, Ordering::Relaxed)
    }

    fn push(&self, node: Box<ProducerNode<T, C>>) -> *mut ProducerNode<T, C> {
        let raw = Box::into_raw(node);
        loop {
            let head = self.head.load(Ordering::Acquire);
            unsafe { (*raw).next.store(head, Ordering::Relaxed) };
            if self
                .head
                .compare_exchange(head, raw, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.producer_count.fetch_add(1, Ordering::Relaxed);
                return raw;
            }
        }
    }

    /// Runs `f` on every live producer node (wait-free traversal,
    /// spec.md §5).
    pub(crate) fn for_each(&self, mut f: impl FnMut(&ProducerSlot<T, C>)) {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            f(&node.slot);
            cur = node.next.load(Ordering::Acquire);
        }
    }

    /// Steps `steps` nodes forward from `from` (or the head if `from` is
    /// null), wrapping around. Used by consumer-token rotation.
    pub(crate) fn step(&self, from: *mut ProducerNode<T, C>, steps: usize) -> *mut ProducerNode<T, C> {
        let count = self.producer_count().max(1);
        let mut cur = if from.is_null() {
            self.head.load(Ordering::Acquire)
        } else {
            from
        };
        for _ in 0..(steps % count) {
            let next = unsafe {
                let n = (*cur).next.load(Ordering::Acquire);
                if n.is_null() {
                    self.head.load(Ordering::Acquire)
                } else {
                    n
                }
            };
            cur = next;
        }
        cur
    }

    pub(crate) fn head_node(&self) -> *mut ProducerNode<T, C> {
        self.head.load(Ordering::Acquire)
    }

    pub(crate) fn slot_of<'a>(&'a self, node: *mut ProducerNode<T, C>) -> &'a ProducerSlot<T, C> {
        unsafe { &(*node).slot }
    }

    fn recycle(&self, kind: ProducerKind) -> Option<*mut ProducerNode<T, C>> {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            let matches = node.slot.kind() == kind;
            let inactive_flag = match &node.slot {
                ProducerSlot::Explicit(p) => &p.core.inactive,
                ProducerSlot::Implicit(p) => &p.core.inactive,
            };
            if matches
                && inactive_flag
                    .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return Some(cur);
            }
            cur = node.next.load(Ordering::Acquire);
        }
        None
    }

    /// Obtains (by recycling or creating) the explicit producer for a fresh
    /// [`crate::token::ProducerToken`].
    pub(crate) fn get_or_create_explicit(&self) -> *mut ExplicitProducer<T, C> {
        if let Some(node) = self.recycle(ProducerKind::Explicit) {
            if let ProducerSlot::Explicit(p) = unsafe { &(*node).slot } {
                return p.as_ref() as *const _ as *mut _;
            }
            unreachable!();
        }
        let producer = ExplicitProducer::new(self.pool);
        let ptr: *mut ExplicitProducer<T, C> = Box::as_ref(&producer) as *const _ as *mut _;
        let node = Box::new(ProducerNode {
            slot: ProducerSlot::Explicit(producer),
            next: AtomicPtr::new(ptr::null_mut()),
        });
        self.push(node);
        ptr
    }

    fn lookup_implicit(&self, thread_id: u64) -> Option<*mut ImplicitProducer<T, C>> {
        let mut header_ptr = self.implicit_hash.load(Ordering::Acquire);
        let hash = murmur3_finalizer(thread_id) as usize;
        while !header_ptr.is_null() {
            let header = unsafe { &*header_ptr };
            let mut idx = hash & (header.capacity - 1);
            for _ in 0..header.capacity {
                let key = header.entries[idx].key.load(Ordering::Acquire);
                if key == thread_id {
                    let p = header.entries[idx].producer.load(Ordering::Acquire);
                    if !p.is_null() {
                        return Some(p);
                    }
                }
                if key == INVALID_THREAD_ID {
                    break;
                }
                idx = (idx + 1) & (header.capacity - 1);
            }
            header_ptr = header.prev.load(Ordering::Acquire);
        }
        None
    }

    fn maybe_grow_hash(&self, observed_capacity: usize) {
        if self
            .hash_resizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let current = self.implicit_hash.load(Ordering::Acquire);
        if unsafe { (*current).capacity } == observed_capacity {
            let new_header = ImplicitHashHeader::new(observed_capacity * 2);
            new_header.prev.store(current, Ordering::Relaxed);
            self.implicit_hash.store(Box::into_raw(new_header), Ordering::Release);
        }
        self.hash_resizing.store(false, Ordering::Release);
    }

    fn insert_implicit(&self, thread_id: u64, producer: *mut ImplicitProducer<T, C>) {
        loop {
            let header_ptr = self.implicit_hash.load(Ordering::Acquire);
            let header = unsafe { &*header_ptr };
            let hash = murmur3_finalizer(thread_id) as usize;
            let mut idx = hash & (header.capacity - 1);
            let mut placed = false;
            for _ in 0..header.capacity {
                let existing = header.entries[idx].key.load(Ordering::Acquire);
                if existing == INVALID_THREAD_ID || existing == REUSABLE_THREAD_ID {
                    if header.entries[idx]
                        .key
                        .compare_exchange(existing, thread_id, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        header.entries[idx].producer.store(producer, Ordering::Release);
                        let used = header.used.fetch_add(1, Ordering::AcqRel) + 1;
                        if used * 2 >= header.capacity {
                            self.maybe_grow_hash(header.capacity);
                        }
                        placed = true;
                        break;
                    }
                    continue;
                }
                idx = (idx + 1) & (header.capacity - 1);
            }
            if placed {
                return;
            }
            self.maybe_grow_hash(header.capacity);
        }
    }

    /// Obtains (by lookup, recycling, or creation) the implicit producer
    /// bound to `thread_id`.
    pub(crate) fn get_or_create_implicit(&self, thread_id: u64) -> Option<*mut ImplicitProducer<T, C>> {
        if C::INITIAL_IMPLICIT_PRODUCER_HASH_SIZE == 0 {
            return None;
        }
        if let Some(p) = self.lookup_implicit(thread_id) {
            return Some(p);
        }
        let ptr = if let Some(node) = self.recycle(ProducerKind::Implicit) {
            if let ProducerSlot::Implicit(p) = unsafe { &(*node).slot } {
                p.as_ref() as *const _ as *mut _
            } else {
                unreachable!()
            }
        } else {
            let producer = ImplicitProducer::new(self.pool);
            let raw: *mut ImplicitProducer<T, C> = Box::as_ref(&producer) as *const _ as *mut _;
            let node = Box::new(ProducerNode {
                slot: ProducerSlot::Implicit(producer),
                next: AtomicPtr::new(ptr::null_mut()),
            });
            self.push(node);
            raw
        };
        self.insert_implicit(thread_id, ptr);
        Some(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BlockPool;
    use crate::traits::DefaultQueueTraits;

    #[test]
    fn implicit_lookup_is_stable_for_same_thread_id() {
        let pool: BlockPool<i32, DefaultQueueTraits> = BlockPool::new(2);
        let registry: ProducerRegistry<i32, DefaultQueueTraits> = ProducerRegistry::new(&pool);
        let a = registry.get_or_create_implicit(7).unwrap();
        let b = registry.get_or_create_implicit(7).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.producer_count(), 1);
    }

    #[test]
    fn distinct_thread_ids_get_distinct_producers() {
        let pool: BlockPool<i32, DefaultQueueTraits> = BlockPool::new(2);
        let registry: ProducerRegistry<i32, DefaultQueueTraits> = ProducerRegistry::new(&pool);
        let a = registry.get_or_create_implicit(1).unwrap();
        let b = registry.get_or_create_implicit(2).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.producer_count(), 2);
    }

    #[test]
    fn explicit_producers_are_pushed_and_traversable() {
        let pool: BlockPool<i32, DefaultQueueTraits> = BlockPool::new(2);
        let registry: ProducerRegistry<i32, DefaultQueueTraits> = ProducerRegistry::new(&pool);
        registry.get_or_create_explicit();
        registry.get_or_create_explicit();
        let mut count = 0;
        registry.for_each(|_| count += 1);
        assert_eq!(count, 2);
    }
}

impl<T, C: QueueTraits> Drop for ProducerRegistry<T, C> {
    fn drop(&mut self) {
        unsafe {
            let mut cur = self.head.load(Ordering::Relaxed);
            while !cur.is_null() {
                let next = (*cur).next.load(Ordering::Relaxed);
                drop(Box::from_raw(cur));
                cur = next;
            }
            let mut header = self.implicit_hash.load(Ordering::Relaxed);
            while !header.is_null() {
                let prev = (*header).prev.load(Ordering::Relaxed);
                drop(Box::from_raw(header));
                header = prev;
            }
        }
    }
}
