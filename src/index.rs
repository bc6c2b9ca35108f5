//! Block-index headers for explicit and implicit producers, spec.md §3
//! ("Block index entry"/"Block index header") and §4.4/§4.5.
//!
//! Both headers grow by doubling and chain the old header as `prev`
//! (spec.md §9 "Retained prior tables") rather than freeing it, so a
//! consumer still holding a stale header pointer never dereferences freed
//! memory.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::block::Block;

/// One `{base, block}` pair for an explicit producer's circular index.
/// Plain (non-atomic) fields: the explicit index has a single writer (the
/// owning producer), and is published via the header's `front` atomic.
pub(crate) struct ExplicitIndexEntry<T> {
    pub(crate) base: usize,
    pub(crate) block: *mut Block<T>,
}

impl<T> Default for ExplicitIndexEntry<T> {
    fn default() -> Self {
        ExplicitIndexEntry {
            base: 0,
            block: std::ptr::null_mut(),
        }
    }
}

pub(crate) struct ExplicitIndexHeader<T> {
    pub(crate) capacity: usize,
    entries: Box<[UnsafeCell<ExplicitIndexEntry<T>>]>,
    /// Index (mod capacity) of the most recently published entry.
    pub(crate) front: AtomicUsize,
    /// Count of entries written so far, used to find the next free slot.
    pub(crate) count: usize,
    pub(crate) prev: AtomicPtr<ExplicitIndexHeader<T>>,
}

unsafe impl<T: Send> Send for ExplicitIndexHeader<T> {}
unsafe impl<T: Send> Sync for ExplicitIndexHeader<T> {}

impl<T> ExplicitIndexHeader<T> {
    pub(crate) fn new(capacity: usize) -> Box<Self> {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || UnsafeCell::new(ExplicitIndexEntry::default()));
        Box::new(ExplicitIndexHeader {
            capacity,
            entries: entries.into_boxed_slice(),
            front: AtomicUsize::new(0),
            count: 0,
            prev: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    /// Writes entry slot `slot` (single-writer only).
    ///
    /// # Safety
    /// Must only be called by the owning producer thread.
    pub(crate) unsafe fn write(&self, slot: usize, base: usize, block: *mut Block<T>) {
        let cell = self.entries[slot & (self.capacity - 1)].get();
        (*cell).base = base;
        (*cell).block = block;
    }

    /// Reads entry slot `slot`. Safe for concurrent readers as long as the
    /// read is ordered after an acquire-load of `front` that observed a
    /// publish covering this slot.
    pub(crate) fn read(&self, slot: usize) -> (usize, *mut Block<T>) {
        let cell = self.entries[slot & (self.capacity - 1)].get();
        unsafe { ((*cell).base, (*cell).block) }
    }

    pub(crate) fn publish_front(&self, slot: usize) {
        self.front.store(slot, Ordering::Release);
    }

    pub(crate) fn load_front(&self) -> usize {
        self.front.load(Ordering::Acquire)
    }
}

/// One `{key, block}` pair for an implicit producer's open/closed index.
/// Both fields are atomic: insertion is single-writer (the owning thread)
/// but reads happen from arbitrary consumer threads.
pub(crate) struct ImplicitIndexEntry<T> {
    pub(crate) key: AtomicUsize,
    pub(crate) block: AtomicPtr<Block<T>>,
}

pub(crate) struct ImplicitIndexHeader<T> {
    pub(crate) capacity: usize,
    entries: Box<[ImplicitIndexEntry<T>]>,
    /// Write cursor: index of the next slot a new block will occupy.
    pub(crate) tail: AtomicUsize,
    pub(crate) prev: AtomicPtr<ImplicitIndexHeader<T>>,
}

unsafe impl<T: Send> Send for ImplicitIndexHeader<T> {}
unsafe impl<T: Send> Sync for ImplicitIndexHeader<T> {}

impl<T> ImplicitIndexHeader<T> {
    pub(crate) fn new(capacity: usize) -> Box<Self> {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || ImplicitIndexEntry {
            key: AtomicUsize::new(usize::MAX),
            block: AtomicPtr::new(std::ptr::null_mut()),
        });
        Box::new(ImplicitIndexHeader {
            capacity,
            entries: entries.into_boxed_slice(),
            tail: AtomicUsize::new(0),
            prev: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    pub(crate) fn insert(&self, base: usize, block: *mut Block<T>) -> usize {
        let slot = self.tail.fetch_add(1, Ordering::Relaxed) & (self.capacity - 1);
        self.entries[slot].block.store(block, Ordering::Relaxed);
        self.entries[slot].key.store(base, Ordering::Release);
        slot
    }

    pub(crate) fn entry(&self, slot: usize) -> (usize, *mut Block<T>) {
        let slot = slot & (self.capacity - 1);
        let key = self.entries[slot].key.load(Ordering::Acquire);
        let block = self.entries[slot].block.load(Ordering::Acquire);
        (key, block)
    }

    pub(crate) fn load_tail(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }
}
