//! Block pool: initial pre-allocated array with free-list-backed growth,
//! spec.md §4.3.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::block::Block;
use crate::freelist::FreeList;
use crate::traits::QueueTraits;

/// Owns every [`Block`] ever allocated for one queue, for the queue's whole
/// lifetime (SPEC_FULL.md §3 "Arena ownership"). Handed-out blocks are raw,
/// non-owning pointers into `arena`; nothing is ever deallocated early.
pub(crate) struct BlockPool<T, C: QueueTraits> {
    arena: Mutex<Vec<Box<Block<T>>>>,
    initial_blocks: Box<[*mut Block<T>]>,
    initial_index: AtomicUsize,
    free_list: FreeList<T>,
    _config: PhantomData<C>,
}

unsafe impl<T: Send, C: QueueTraits> Send for BlockPool<T, C> {}
unsafe impl<T: Send, C: QueueTraits> Sync for BlockPool<T, C> {}

impl<T, C: QueueTraits> BlockPool<T, C> {
    pub(crate) fn new(initial_block_count: usize) -> Self {
        let mut arena = Vec::with_capacity(initial_block_count);
        let mut initial_blocks = Vec::with_capacity(initial_block_count);
        for _ in 0..initial_block_count {
            let mut block = Block::new(C::BLOCK_SIZE, C::COUNTER_MODE, true);
            initial_blocks.push(block.as_mut() as *mut Block<T>);
            arena.push(block);
        }
        BlockPool {
            arena: Mutex::new(arena),
            initial_blocks: initial_blocks.into_boxed_slice(),
            initial_index: AtomicUsize::new(0),
            free_list: FreeList::new(),
            _config: PhantomData,
        }
    }

    /// Obtains a block: recycled from the free list first, then the untouched
    /// tail of the initial array, then — only if `allow_alloc` — a freshly
    /// heap-allocated one. Returns `None` when no block is available under
    /// the requested allocation policy (spec.md §4.9 `SubqueueFull`/
    /// `AllocationFailure`, modeled as the caller declining growth rather
    /// than true allocator-OOM; see DESIGN.md).
    pub(crate) fn acquire(&self, allow_alloc: bool) -> Option<*mut Block<T>> {
        let recycled = self.free_list.try_get();
        if !recycled.is_null() {
            unsafe { (*recycled).reset_empty() };
            return Some(recycled);
        }

        let idx = self.initial_index.fetch_add(1, Ordering::AcqRel);
        if idx < self.initial_blocks.len() {
            let ptr = self.initial_blocks[idx];
            unsafe { (*ptr).set_all_empty() };
            return Some(ptr);
        }

        if !allow_alloc {
            return None;
        }

        let mut block = Block::new(C::BLOCK_SIZE, C::COUNTER_MODE, false);
        block.set_all_empty();
        let ptr = block.as_mut() as *mut Block<T>;
        self.arena.lock().push(block);
        Some(ptr)
    }

    /// Returns a fully-drained block to circulation, honoring
    /// `RECYCLE_ALLOCATED_BLOCKS` for heap-grown blocks (initial-array blocks
    /// always recycle, matching the teacher's fixed-slab reuse policy).
    ///
    /// # Safety
    /// `block` must currently be owned by no producer and have no live
    /// readers.
    pub(crate) unsafe fn release(&self, block: *mut Block<T>) {
        if (*block).pooled || C::RECYCLE_ALLOCATED_BLOCKS {
            self.free_list.add(block);
        }
    }

    pub(crate) fn initial_block_count(&self) -> usize {
        self.initial_blocks.len()
    }
}
