//! Implicit producer sub-queue, spec.md §4.5.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::block::Block;
use crate::index::ImplicitIndexHeader;
use crate::pool::BlockPool;
use crate::producer::SubqueueCore;
use crate::traits::QueueTraits;

/// Bound to a thread identity via the registry's implicit hash rather than a
/// caller-held token. Blocks are returned to the global pool as soon as they
/// are fully drained, rather than retained in a private cyclic list.
pub(crate) struct ImplicitProducer<T, C: QueueTraits> {
    pub(crate) core: SubqueueCore,
    tail_block: UnsafeCell<*mut Block<T>>,
    index: AtomicPtr<ImplicitIndexHeader<T>>,
    index_count: UnsafeCell<usize>,
    pool: *const BlockPool<T, C>,
    _config: PhantomData<C>,
}

unsafe impl<T: Send, C: QueueTraits> Send for ImplicitProducer<T, C> {}
unsafe impl<T: Send, C: QueueTraits> Sync for ImplicitProducer<T, C> {}

impl<T, C: QueueTraits> ImplicitProducer<T, C> {
    pub(crate) fn new(pool: *const BlockPool<T, C>) -> Box<Self> {
        let index = ImplicitIndexHeader::new(C::IMPLICIT_INITIAL_INDEX_SIZE);
        Box::new(ImplicitProducer {
            core: SubqueueCore::new(),
            tail_block: UnsafeCell::new(ptr::null_mut()),
            index: AtomicPtr::new(Box::into_raw(index)),
            index_count: UnsafeCell::new(0),
            pool,
            _config: PhantomData,
        })
    }

    fn pool(&self) -> &BlockPool<T, C> {
        unsafe { &*self.pool }
    }

    fn current_index(&self) -> &ImplicitIndexHeader<T> {
        unsafe { &*self.index.load(Ordering::Acquire) }
    }

    unsafe fn insert_index(&self, base: usize, block: *mut Block<T>) {
        let count = *self.index_count.get();
        if count >= self.current_index().capacity {
            let new_capacity = self.current_index().capacity * 2;
            let new_header = ImplicitIndexHeader::new(new_capacity);
            new_header
                .prev
                .store(self.index.load(Ordering::Relaxed), Ordering::Relaxed);
            self.index.store(Box::into_raw(new_header), Ordering::Release);
            *self.index_count.get() = 0;
        }
        self.current_index().insert(base, block);
        *self.index_count.get() += 1;
    }

    fn resolve_block(&self, logical_index: usize) -> *mut Block<T> {
        let header = self.current_index();
        let tail = header.load_tail();
        let last_slot = tail.wrapping_sub(1);
        let (last_base, _) = header.entry(last_slot);
        let block_base = logical_index & !(C::BLOCK_SIZE - 1);
        let diff = block_base.wrapping_sub(last_base) as isize;
        let offset = diff / (C::BLOCK_SIZE as isize);
        let slot = (last_slot as isize).wrapping_add(offset) as usize;
        let (_, block) = header.entry(slot);
        block
    }

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
            let block = match self.pool().acquire(allow_alloc) {
                Some(b) => b,
                None => return Err(item),
            };
            self.insert_index(current_tail, block);
            *self.tail_block.get() = block;
            ptr::write((*block).slot(current_tail), item);
            self.core.tail_index.store(current_tail.wrapping_add(1), Ordering::Release);
            Ok(())
        }
    }

    pub(crate) fn enqueue_bulk(&self, items: Vec<T>, allow_alloc: bool) -> Result<(), Vec<T>> {
        // Pre-count required new blocks and bail before writing anything if
        // they cannot all be obtained, matching the explicit variant's
        // all-or-nothing bulk contract.
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
            let first_slot = start_tail & (C::BLOCK_SIZE - 1);
            let mut remaining = count;
            if first_slot != 0 {
                remaining = remaining.saturating_sub(C::BLOCK_SIZE - first_slot);
            }
            let new_blocks_needed = (remaining + C::BLOCK_SIZE - 1) / C::BLOCK_SIZE;

            let mut staged = Vec::with_capacity(new_blocks_needed);
            for _ in 0..new_blocks_needed {
                match self.pool().acquire(allow_alloc) {
                    Some(b) => staged.push(b),
                    None => {
                        for b in staged {
                            self.pool().release(b);
                        }
                        return Err(items);
                    }
                }
            }

            let mut items = items;
            items.reverse();
            let mut cursor = start_tail;
            let mut written = 0usize;
            let mut staged_iter = staged.into_iter();
            let mut block = *self.tail_block.get();

            while written < count {
                if cursor & (C::BLOCK_SIZE - 1) == 0 {
                    let next_block = staged_iter.next().expect("pre-staged enough blocks");
                    self.insert_index(cursor, next_block);
                    block = next_block;
                }
                let room = C::BLOCK_SIZE - (cursor & (C::BLOCK_SIZE - 1));
                let run = room.min(count - written);
                for _ in 0..run {
                    let item = items.pop().expect("count matches items.len()");
                    ptr::write((*block).slot(cursor), item);
                    cursor = cursor.wrapping_add(1);
                    written += 1;
                }
            }
            *self.tail_block.get() = block;
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
            if (*block).mark_empty(first) {
                self.pool().release(block);
            }
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
                if (*block).mark_many_empty(idx, run) {
                    self.pool().release(block);
                }
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

impl<T, C: QueueTraits> Drop for ImplicitProducer<T, C> {
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
    use crate::traits::DefaultQueueTraits;

    #[test]
    fn single_threaded_round_trip() {
        let pool: BlockPool<i32, DefaultQueueTraits> = BlockPool::new(2);
        let producer = ImplicitProducer::<i32, DefaultQueueTraits>::new(&pool);
        assert!(producer.enqueue(1, true).is_ok());
        assert!(producer.enqueue(2, true).is_ok());
        assert_eq!(producer.dequeue(), Some(1));
        assert_eq!(producer.dequeue(), Some(2));
    }

    #[test]
    fn block_returns_to_pool_once_fully_drained() {
        let pool: BlockPool<i32, DefaultQueueTraits> = BlockPool::new(1);
        let producer = ImplicitProducer::<i32, DefaultQueueTraits>::new(&pool);
        for i in 0..DefaultQueueTraits::BLOCK_SIZE as i32 {
            assert!(producer.enqueue(i, true).is_ok());
        }
        for _ in 0..DefaultQueueTraits::BLOCK_SIZE {
            assert!(producer.dequeue().is_some());
        }
        // The block drained above should be recyclable now, not leaked.
        assert!(pool.acquire(false).is_some());
    }
}
