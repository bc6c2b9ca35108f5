//! Fixed-capacity element storage and emptiness tracking, spec.md §4.1.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

/// The top bit of a `usize`, used by the free list's refcount field as the
/// "should be on free list" flag (spec.md §4.2 / §9).
pub(crate) const SHOULD_BE_ON_FREE_LIST: usize = 1 << (usize::BITS - 1);

/// One fixed-capacity slab of element storage plus emptiness metadata.
///
/// Every block ever handed out by a [`crate::pool::BlockPool`] lives in that
/// pool's arena for the whole lifetime of the queue (SPEC_FULL.md §3); this
/// type itself never frees its own slots early, it only reports whether
/// they have all been consumed.
pub(crate) struct Block<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    counter_mode: bool,
    /// One flag per slot when `!counter_mode`; empty (zero-length) otherwise.
    empty_flags: Box<[AtomicBool]>,
    /// Count of slots marked empty, valid only when `counter_mode`.
    empty_count: AtomicUsize,
    /// Link used by an explicit producer's cyclic block list. Single-writer
    /// (the owning producer); consumers never follow this pointer.
    pub(crate) next: AtomicPtr<Block<T>>,
    /// Free-list refcount / ABA-guard field, spec.md §4.2.
    pub(crate) free_list_refs: AtomicUsize,
    pub(crate) free_list_next: AtomicPtr<Block<T>>,
    /// `true` for blocks handed out of the initial pool array, `false` for
    /// ones allocated on demand. Governs `RECYCLE_ALLOCATED_BLOCKS` policy.
    pub(crate) pooled: bool,
}

impl<T> Block<T> {
    pub(crate) fn new(size: usize, counter_mode: bool, pooled: bool) -> Box<Self> {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || UnsafeCell::new(MaybeUninit::uninit()));
        let empty_flags = if counter_mode {
            Vec::new().into_boxed_slice()
        } else {
            let mut flags = Vec::with_capacity(size);
            flags.resize_with(size, || AtomicBool::new(true));
            flags.into_boxed_slice()
        };
        Box::new(Block {
            slots: slots.into_boxed_slice(),
            counter_mode,
            empty_flags,
            empty_count: AtomicUsize::new(size),
            next: AtomicPtr::new(std::ptr::null_mut()),
            free_list_refs: AtomicUsize::new(0),
            free_list_next: AtomicPtr::new(std::ptr::null_mut()),
            pooled,
        })
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.slots.len()
    }

    /// Raw pointer to the slot storage at `logical_index mod size()`.
    ///
    /// # Safety
    /// The caller is responsible for all placement-construction /
    /// destruction discipline; this only computes an address.
    #[inline]
    pub(crate) unsafe fn slot(&self, logical_index: usize) -> *mut T {
        let i = logical_index & (self.size() - 1);
        self.slots[i].get() as *mut T
    }

    /// Marks a single logical slot consumed. Returns whether the block just
    /// became completely empty.
    pub(crate) fn mark_empty(&self, logical_index: usize) -> bool {
        if self.counter_mode {
            let prev = self.empty_count.fetch_add(1, Ordering::AcqRel);
            prev + 1 == self.size()
        } else {
            let i = logical_index & (self.size() - 1);
            self.empty_flags[i].store(true, Ordering::Release);
            self.is_empty()
        }
    }

    /// Marks `count` contiguous logical slots starting at `start` consumed.
    pub(crate) fn mark_many_empty(&self, start: usize, count: usize) -> bool {
        if count == 0 {
            return self.is_empty();
        }
        if self.counter_mode {
            let prev = self.empty_count.fetch_add(count, Ordering::AcqRel);
            prev + count == self.size()
        } else {
            for k in 0..count {
                let i = (start + k) & (self.size() - 1);
                self.empty_flags[i].store(true, Ordering::Release);
            }
            self.is_empty()
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        if self.counter_mode {
            let empty = self.empty_count.load(Ordering::Relaxed) == self.size();
            std::sync::atomic::fence(Ordering::Acquire);
            empty
        } else {
            let all = self.empty_flags.iter().all(|f| f.load(Ordering::Relaxed));
            std::sync::atomic::fence(Ordering::Acquire);
            all
        }
    }

    /// Reinitializes emptiness metadata so the block can be reused for a
    /// fresh round of writes (it is about to be filled from slot 0 again).
    pub(crate) fn reset_empty(&self) {
        self.set_all_empty_inner(false);
    }

    /// Marks every slot empty without constructing/destroying anything,
    /// used when a freshly allocated block enters circulation.
    pub(crate) fn set_all_empty(&self) {
        self.set_all_empty_inner(true);
    }

    fn set_all_empty_inner(&self, empty: bool) {
        if self.counter_mode {
            self.empty_count.store(
                if empty { self.size() } else { 0 },
                Ordering::Release,
            );
        } else {
            for f in self.empty_flags.iter() {
                f.store(empty, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_mode_tracks_emptiness_per_slot() {
        let block: Box<Block<u32>> = Block::new(4, false, false);
        assert!(block.is_empty());
        block.reset_empty();
        assert!(!block.is_empty());
        for i in 0..3 {
            assert!(!block.mark_empty(i));
        }
        assert!(block.mark_empty(3));
        assert!(block.is_empty());
    }

    #[test]
    fn counter_mode_tracks_emptiness_via_count() {
        let block: Box<Block<u32>> = Block::new(4, true, false);
        block.reset_empty();
        assert!(!block.is_empty());
        assert!(!block.mark_many_empty(0, 3));
        assert!(block.mark_many_empty(3, 1));
    }

    #[test]
    fn set_all_empty_resets_a_reused_block() {
        let block: Box<Block<u32>> = Block::new(4, false, true);
        assert!(block.is_empty());
        block.reset_empty();
        block.mark_empty(0);
        block.set_all_empty();
        assert!(block.is_empty());
    }
}

impl<T> fmt::Debug for Block<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("addr", &format_args!("{:p}", self))
            .field("size", &self.size())
            .field("counter_mode", &self.counter_mode)
            .field("pooled", &self.pooled)
            .field("empty", &self.is_empty())
            .finish()
    }
}
