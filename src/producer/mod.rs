//! Shared state and reservation protocol for both producer sub-queue
//! variants, spec.md §3 "Producer sub-queue" and §4.4 steps 1-7 (generalized
//! to bulk, reused verbatim by §4.5).

pub(crate) mod explicit;
pub(crate) mod implicit;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Wrap-aware `a < b`, spec.md §9 "Circular index arithmetic".
#[inline]
pub(crate) fn circular_lt(a: usize, b: usize) -> bool {
    (a.wrapping_sub(b) as isize) < 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProducerKind {
    Explicit,
    Implicit,
}

/// The four counters every sub-queue owns regardless of explicit/implicit
/// flavor (spec.md §3 invariants 1-2).
pub(crate) struct SubqueueCore {
    pub(crate) tail_index: CachePadded<AtomicUsize>,
    pub(crate) head_index: CachePadded<AtomicUsize>,
    dequeue_optimistic_count: CachePadded<AtomicUsize>,
    dequeue_overcommit: CachePadded<AtomicUsize>,
    /// Set when the producer token backing this sub-queue has been dropped
    /// (explicit) or the thread is believed gone (implicit); the registry
    /// may recycle a matching-kind `inactive` sub-queue for a new token.
    pub(crate) inactive: AtomicBool,
}

impl SubqueueCore {
    pub(crate) fn new() -> Self {
        SubqueueCore {
            tail_index: CachePadded::new(AtomicUsize::new(0)),
            head_index: CachePadded::new(AtomicUsize::new(0)),
            dequeue_optimistic_count: CachePadded::new(AtomicUsize::new(0)),
            dequeue_overcommit: CachePadded::new(AtomicUsize::new(0)),
            inactive: AtomicBool::new(false),
        }
    }

    /// Approximate element count; exact only when quiescent (spec.md §8,
    /// invariant 3).
    pub(crate) fn size_approx(&self) -> usize {
        loop {
            let head = self.head_index.load(Ordering::Relaxed);
            let tail = self.tail_index.load(Ordering::Relaxed);
            if self.head_index.load(Ordering::Relaxed) == head {
                return tail.wrapping_sub(head);
            }
        }
    }

    /// Reserves up to `max` elements to dequeue. Returns `(first_index,
    /// count)` with `count` in `1..=max`, or `None` if nothing is
    /// available. This is the full non-blocking reservation protocol from
    /// spec.md §4.4 steps 1-4/7, written once and shared by both producer
    /// kinds since it depends only on the four counters above.
    pub(crate) fn reserve_dequeue(&self, max: usize) -> Option<(usize, usize)> {
        if max == 0 {
            return None;
        }
        let tail = self.tail_index.load(Ordering::Relaxed);
        let overcommit = self.dequeue_overcommit.load(Ordering::Relaxed);
        let optimistic0 = self.dequeue_optimistic_count.load(Ordering::Relaxed);
        if !circular_lt(optimistic0.wrapping_sub(overcommit), tail) {
            return None;
        }
        std::sync::atomic::fence(Ordering::Acquire);

        let desired_count = tail.wrapping_sub(optimistic0.wrapping_sub(overcommit));
        if !circular_lt(0, desired_count) {
            return None;
        }
        let desired_count = desired_count.min(max);

        let my_count = self
            .dequeue_optimistic_count
            .fetch_add(desired_count, Ordering::Relaxed);
        let tail = self.tail_index.load(Ordering::Acquire);
        let actual_count = tail.wrapping_sub(my_count.wrapping_sub(overcommit));
        if circular_lt(0, actual_count) {
            let actual_count = actual_count.min(desired_count);
            if actual_count < desired_count {
                self.dequeue_overcommit
                    .fetch_add(desired_count - actual_count, Ordering::Release);
            }
            let first = self.head_index.fetch_add(actual_count, Ordering::AcqRel);
            Some((first, actual_count))
        } else {
            self.dequeue_overcommit
                .fetch_add(desired_count, Ordering::Release);
            None
        }
    }
}
