//! Lock-free free list with a refcount/ABA protocol, spec.md §4.2 / §9.
//!
//! Nodes are [`Block`]s owned elsewhere (the block pool's arena, see
//! SPEC_FULL.md §3); this type only ever follows raw, non-owning pointers
//! into that arena, so popping or pushing never frees memory.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::block::{Block, SHOULD_BE_ON_FREE_LIST};

const REFS_MASK: usize = !SHOULD_BE_ON_FREE_LIST;

pub(crate) struct FreeList<T> {
    head: AtomicPtr<Block<T>>,
}

impl<T> FreeList<T> {
    pub(crate) fn new() -> Self {
        FreeList {
            head: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Adds `node` to the free list. `node` must not already be reachable
    /// from this list.
    ///
    /// # Safety
    /// `node` must be a valid, live pointer for as long as the free list
    /// (and hence the owning block pool) is alive.
    pub(crate) unsafe fn add(&self, node: *mut Block<T>) {
        let prev = (*node).free_list_refs.fetch_or(SHOULD_BE_ON_FREE_LIST, Ordering::AcqRel);
        if prev == 0 {
            self.add_knowing_refcount_is_zero(node);
        }
    }

    unsafe fn add_knowing_refcount_is_zero(&self, node: *mut Block<T>) {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            (*node).free_list_next.store(head, Ordering::Relaxed);
            (*node).free_list_refs.store(1, Ordering::Release);
            if self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed)
                .is_err()
            {
                // Someone else mutated the list between our load and CAS;
                // if a concurrent popper dropped our refcount back to
                // "should be on list, no reader", take over the attach.
                let prev = (*node)
                    .free_list_refs
                    .fetch_add(SHOULD_BE_ON_FREE_LIST.wrapping_sub(1), Ordering::AcqRel);
                if prev == 1 {
                    continue;
                }
            }
            return;
        }
    }

    /// Pops a node, or returns null if the list is empty.
    pub(crate) fn try_get(&self) -> *mut Block<T> {
        let mut head = self.head.load(Ordering::Acquire);
        unsafe {
            while !head.is_null() {
                let prev_head = head;
                let refs = (*head).free_list_refs.load(Ordering::Relaxed);
                if (refs & REFS_MASK) == 0
                    || (*head)
                        .free_list_refs
                        .compare_exchange(refs, refs + 1, Ordering::Acquire, Ordering::Relaxed)
                        .is_err()
                {
                    head = self.head.load(Ordering::Acquire);
                    continue;
                }

                // We incremented the refcount; `next` is now safe to read
                // even if another thread concurrently tries to re-add `head`.
                let next = (*head).free_list_next.load(Ordering::Relaxed);
                if self
                    .head
                    .compare_exchange(head, next, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    debug_assert_eq!(
                        (*head).free_list_refs.load(Ordering::Relaxed) & SHOULD_BE_ON_FREE_LIST,
                        0
                    );
                    (*head).free_list_refs.fetch_sub(2, Ordering::Release);
                    return head;
                }

                let prev = (*prev_head).free_list_refs.fetch_sub(1, Ordering::AcqRel);
                if prev == SHOULD_BE_ON_FREE_LIST + 1 {
                    self.add_knowing_refcount_is_zero(prev_head);
                }
                head = self.head.load(Ordering::Acquire);
            }
        }
        std::ptr::null_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_returns_same_node() {
        let list: FreeList<u64> = FreeList::new();
        let mut block = Block::new(4, false, false);
        let ptr = block.as_mut() as *mut Block<u64>;
        unsafe {
            list.add(ptr);
            assert_eq!(list.try_get(), ptr);
            assert!(list.try_get().is_null());
        }
    }

    #[test]
    fn empty_list_returns_null() {
        let list: FreeList<u64> = FreeList::new();
        assert!(list.try_get().is_null());
    }

    #[test]
    fn lifo_order_for_two_nodes() {
        let list: FreeList<u64> = FreeList::new();
        let mut a = Block::new(4, false, false);
        let mut b = Block::new(4, false, false);
        let pa = a.as_mut() as *mut Block<u64>;
        let pb = b.as_mut() as *mut Block<u64>;
        unsafe {
            list.add(pa);
            list.add(pb);
            assert_eq!(list.try_get(), pb);
            assert_eq!(list.try_get(), pa);
        }
    }
}
