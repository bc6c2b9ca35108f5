//! Explicit producer sub-queue, spec.md §4.4.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::block::Block;
use crate::index::ExplicitIndexHeader;
use crate::pool::BlockPool;
use crate::producer::SubqueueCore;
use crate::traits::QueueTraits;

/// Bound to a caller-held [`crate::token::ProducerToken`]. Owns a cyclic
/// linked list of blocks and a doubling circular block index.
pub(crate) struct ExplicitProducer<T, C: QueueTraits> {
    pub(crate) core: SubqueueCore,
    /// Single-writer cursor into the cyclic block list; never read by any
    /// other thread (consumers navigate via the block index instead).
    tail_block: UnsafeCell<*mut Block<T>>,
    index: AtomicPtr<ExplicitIndexHeader<T>>,
    /// Count of entries written into the *current* index header, tracked
    /// outside the header since only the producer thread needs it.
    index_count: UnsafeCell<usize>,
    index_front_slot: UnsafeCell<usize>,
    pool: *const BlockPool<T, C>,
    _config: PhantomData<C>,
}

unsafe impl<T: Send, C: QueueTraits> Send for ExplicitProducer<T, C> {}
unsafe impl<T: Send, C: QueueTraits> Sync for ExplicitProducer<T, C> {}

impl<T, C: QueueTraits> ExplicitProducer<T, C> {
    pub(crate) fn new(pool: *const BlockPool<T, C>) -> Box<Self> {
        let index = ExplicitIndexHeader::new(C::EXPLICIT_INITIAL_INDEX_SIZE);
        Box::new(ExplicitProducer {
            core: SubqueueCore::new(),
            tail_block: UnsafeCell::new(ptr::null_mut()),
            index: AtomicPtr::new(Box::into_raw(index)),
            index_count: UnsafeCell::new(0),
            index_front_slot: UnsafeCell::new(0),
            pool,
            _config: PhantomData,
        })
    }

    fn pool(&self) -> &BlockPool<T, C> {
        unsafe { &*self.pool }
    }

    fn current_index(&self) -> &ExplicitIndexHeader<T> {
        unsafe { &*self.index.load(Ordering::Acquire) }
    }

    /// Single-writer: obtains room for one more block, growing or chaining
    /// the index header if its current one is full. Returns the slot the
    /// caller should write the new entry into.
    unsafe fn next_index_slot(&self) -> Option<usize> {
        let header = self.current_index();
        let count = *self.index_count.get();
        if count < header.capacity {
            *self.index_count.get() = count + 1;
            return Some(count);
        }
        let new_capacity = header.capacity * 2;
        let new_header = ExplicitIndexHeader::new(new_capacity);
        new_header.prev.store(header as *const _ as *mut _, Ordering::Relaxed);
        let new_header_ptr = Box::into_raw(new_header);
        self.index.store(new_header_ptr, Ordering::Release);
        *self.index_count.get() = 1;
        Some(0)
    }

    /// Splices one freshly obtained block after `after` in the cyclic list
    /// (or makes it the sole element of a brand-new list if `after` is
    /// null), writes its index entry, and publishes `front`.
    unsafe fn link_and_index(&self, after: *mut Block<T>, new_block: *mut Block<T>, base: usize, slot: usize) {
        if after.is_null() {
            (*new_block).next.store(new_block, Ordering::Relaxed);
        } else {
            let old_next = (*after).next.load(Ordering::Relaxed);
            (*new_block).next.store(old_next, Ordering::Relaxed);
            (*after).next.store(new_block, Ordering::Relaxed);
        }
        let header = self.current_index();
        header.write(slot, base, new_block);
        header.publish_front(slot);
        *self.index_front_slot.get() = slot;
    }

    /// Resolves a logical enqueue index to the block that currently
    /// contains it, per spec.md §4.4 step 5.
    fn resolve_block(&self, logical_index: usize) -> *mut Block<T> {
        let header = self.current_index();
        let front = header.load_front();
        let (front_base, _) = header.read(front);
        let block_base = logical_index & !(C::BLOCK_SIZE - 1);
        let diff = (block_base.wrapping_sub(front_base)) as isize;
        let offset = diff / (C::BLOCK_SIZE as isize);
        let slot = (front as isize).wrapping_add(offset) as usize;
        let (_, block) = header.read(slot);
        block
    }

    /// Attempts to place `item` at the current tail. `Err` returns the item
    /// untouched (spec.md §4.9: failed enqueue has no observable effect).
    pub(crate) fn enqueue(&self, item: T, allow_alloc: bool) -> Result<(), T> {
        unsafe {
            let current_tail = self.core.tail_index.load(Ordering::Relaxed);
            if current_tail & (C::BLOCK_SIZE - 1) != 0 {
                let block = *self.tail_block.get();
                ptr::write((*block).slot(current_tail), item);
                self.core.tail_index.store(current_tail.wrapping_add(1), Ordering::Release);
                return Ok(());
            }

            let head = self.core.head_index.load(Ordering::Relaxed);
            if current_tail.wrapping_sub(head) + C::BLOCK_SIZE > C::MAX_SUBQUEUE_SIZE {
                return Err(item);
            }

            let current_block = *self.tail_block.get();
            let reuse = if !current_block.is_null() {
                let next = (*current_block).next.load(Ordering::Relaxed);
                if !next.is_null() && (*next).is_empty() {
                    Some(next)
                } else {
                    None
                }
            } else {
                None
            };

            let new_block = match reuse {
                Some(b) => {
                    (*b).reset_empty();
                    b
                }
                None => match self.pool().acquire(allow_alloc) {
                    Some(b) => b,
                    None => return Err(item),
                },
            };

            let slot = match self.next_index_slot() {
                Some(s) => s,
                None => {
                    if new_block != reuse.unwrap_or(ptr::null_mut()) {
                        self.pool().release(new_block);
                    }
                    return Err(item);
                }
            };

            if reuse.is_none() {
                self.link_and_index(current_block, new_block, current_tail, slot);
            } else {
                let header = self.current_index();
                header.write(slot, current_tail, new_block);
                header.publish_front(slot);
                *self.index_front_slot.get() = slot;
            }
            *self.tail_block.get() = new_block;

            ptr::write((*new_block).slot(current_tail), item);
            self.core.tail_index.store(current_tail.wrapping_add(1), Ordering::Release);
            Ok(())
        }
    }

    /// Enqueues `items` as one batch; either all are enqueued or (on
    /// allocation/capacity failure) none are, and `items` is returned
    /// untouched. Visibility is published with a single release-store of
    /// `tail_index` at the end (spec.md §4.4 "Bulk enqueue").
    pub(crate) fn enqueue_bulk(&self, items: Vec<T>, allow_alloc: bool) -> Result<(), Vec<T>> {
        let count = items.len();
        if count == 0 {
            return Ok(());
        }
        unsafe {
            let start_tail = self.core.tail_index.load(Ordering::Relaxed);
            let head = self.core.head_index.load(Ordering::Relaxed);
            if start_tail.wrapping_sub(head) + count + C::BLOCK_SIZE > C::MAX_SUBQUEUE_SIZE {
                return Err(items);
            }

            // Phase 1: figure out how many block transitions this batch
            // spans and stage the blocks it needs without publishing
            // anything yet, so a failure here leaves no observable state.
            let first_slot_in_block = start_tail & (C::BLOCK_SIZE - 1);
            let mut remaining = count;
            let mut blocks_needed = 0usize;
            if first_slot_in_block != 0 {
                let in_current = C::BLOCK_SIZE - first_slot_in_block;
                remaining = remaining.saturating_sub(in_current);
            }
            blocks_needed += (remaining + C::BLOCK_SIZE - 1) / C::BLOCK_SIZE;

            let mut probe_block = *self.tail_block.get();
            let mut reusable = 0usize;
            let mut scan = if probe_block.is_null() {
                ptr::null_mut()
            } else {
                (*probe_block).next.load(Ordering::Relaxed)
            };
            while reusable < blocks_needed && !scan.is_null() && (*scan).is_empty() {
                reusable += 1;
                scan = (*scan).next.load(Ordering::Relaxed);
                if scan == *self.tail_block.get() {
                    break;
                }
            }
            let to_allocate = blocks_needed - reusable;

            let mut staged = Vec::with_capacity(to_allocate);
            if to_allocate > 0 {
                let mut ok = true;
                for _ in 0..to_allocate {
                    match self.pool().acquire(allow_alloc) {
                        Some(b) => staged.push(b),
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if !ok {
                    for b in staged {
                        self.pool().release(b);
                    }
                    return Err(items);
                }
            }

            // Phase 2: commit. Walk forward writing elements, advancing
            // through reused-empty blocks then staged new ones.
            let mut items = items;
            items.reverse(); // pop() from the front in original order
            let mut cursor_tail = start_tail;
            let mut written = 0usize;
            let mut staged_iter = staged.into_iter();
            probe_block = *self.tail_block.get();

            while written < count {
                let slot_in_block = cursor_tail & (C::BLOCK_SIZE - 1);
                let block = if slot_in_block != 0 {
                    probe_block
                } else {
                    let reuse_next = if !probe_block.is_null() {
                        let n = (*probe_block).next.load(Ordering::Relaxed);
                        if !n.is_null() && (*n).is_empty() {
                            Some(n)
                        } else {
                            None
                        }
                    } else {
                        None
                    };
                    let next_block = match reuse_next {
                        Some(b) => {
                            (*b).reset_empty();
                            b
                        }
                        None => staged_iter.next().expect("pre-staged enough blocks"),
                    };
                    let slot = self
                        .next_index_slot()
                        .expect("index growth cannot fail once capacity was pre-checked at construction");
                    if reuse_next.is_none() {
                        self.link_and_index(probe_block, next_block, cursor_tail, slot);
                    } else {
                        let header = self.current_index();
                        header.write(slot, cursor_tail, next_block);
                        header.publish_front(slot);
                        *self.index_front_slot.get() = slot;
                    }
                    probe_block = next_block;
                    next_block
                };

                let in_block_room = C::BLOCK_SIZE - (cursor_tail & (C::BLOCK_SIZE - 1));
                let this_round = in_block_room.min(count - written);
                for _ in 0..this_round {
                    let item = items.pop().expect("count matches items.len()");
                    ptr::write((*block).slot(cursor_tail), item);
                    cursor_tail = cursor_tail.wrapping_add(1);
                    written += 1;
                }
            }

            *self.tail_block.get() = probe_block;
            self.core.tail_index.store(start_tail.wrapping_add(count), Ordering::Release);
            Ok(())
        }
    }

    pub(crate) fn dequeue(&self) -> Option<T> {
        let (first, count) = self.core.reserve_dequeue(1)?;
        debug_assert_eq!(count, 1);
        unsafe {
            let block = self.resolve_block(first);
            let value = ptr::read((*block).slot(first) as *const T);
            (*block).mark_empty(first);
            Some(value)
        }
    }

    pub(crate) fn dequeue_bulk(&self, max: usize, out: &mut Vec<T>) -> usize {
        let (first, count) = match self.core.reserve_dequeue(max) {
            Some(r) => r,
            None => return 0,
        };
        unsafe {
            let mut idx = first;
            let mut remaining = count;
            while remaining > 0 {
                let block = self.resolve_block(idx);
                let slot_in_block = idx & (C::BLOCK_SIZE - 1);
                let run = (C::BLOCK_SIZE - slot_in_block).min(remaining);
                for k in 0..run {
                    let value = ptr::read((*block).slot(idx + k) as *const T);
                    out.push(value);
                }
                (*block).mark_many_empty(idx, run);
                idx = idx.wrapping_add(run);
                remaining -= run;
            }
        }
        count
    }

    pub(crate) fn size_approx(&self) -> usize {
        self.core.size_approx()
    }
}

impl<T, C: QueueTraits> Drop for ExplicitProducer<T, C> {
    fn drop(&mut self) {
        unsafe {
            let mut header = self.index.load(Ordering::Relaxed);
            while !header.is_null() {
                let prev = (*header).prev.load(Ordering::Relaxed);
                drop(Box::from_raw(header));
                header = prev;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BlockPool;

    struct TinyQueue;
    impl QueueTraits for TinyQueue {
        const BLOCK_SIZE: usize = 4;
        const EXPLICIT_INITIAL_INDEX_SIZE: usize = 2;
        const MAX_SUBQUEUE_SIZE: usize = 8;
    }

    #[test]
    fn single_threaded_enqueue_dequeue_round_trip() {
        let pool: BlockPool<i32, TinyQueue> = BlockPool::new(2);
        let producer = ExplicitProducer::<i32, TinyQueue>::new(&pool);
        assert!(producer.enqueue(1, true).is_ok());
        assert!(producer.enqueue(2, true).is_ok());
        assert_eq!(producer.dequeue(), Some(1));
        assert_eq!(producer.dequeue(), Some(2));
        assert_eq!(producer.dequeue(), None);
    }

    #[test]
    fn exceeding_max_subqueue_size_fails_without_side_effects() {
        let pool: BlockPool<i32, TinyQueue> = BlockPool::new(4);
        let producer = ExplicitProducer::<i32, TinyQueue>::new(&pool);
        for i in 0..8 {
            assert!(producer.enqueue(i, true).is_ok());
        }
        // The 9th element on an 8-capacity sub-queue must fail, and the
        // value must come back untouched.
        match producer.enqueue(99, true) {
            Ok(()) => panic!("expected sub-queue-full rejection"),
            Err(v) => assert_eq!(v, 99),
        }
    }

    #[test]
    fn bulk_round_trip_preserves_order() {
        let pool: BlockPool<i32, TinyQueue> = BlockPool::new(4);
        let producer = ExplicitProducer::<i32, TinyQueue>::new(&pool);
        assert!(producer.enqueue_bulk(vec![1, 2, 3, 4], true).is_ok());
        let mut out = Vec::new();
        assert_eq!(producer.dequeue_bulk(4, &mut out), 4);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
