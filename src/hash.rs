//! Thread identity and hashing for the implicit-producer hash, spec.md §4.6
//! and §9 "Thread identity" resolution.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = Cell::new(0);
}

/// A process-wide, never-reused identifier for the calling thread.
///
/// `std::thread::ThreadId` carries no public integer representation, so each
/// thread lazily claims one from a monotonic counter the first time it is
/// needed and caches it for the life of the thread.
pub(crate) fn current_thread_id() -> u64 {
    THREAD_ID.with(|cell| {
        let id = cell.get();
        if id != 0 {
            return id;
        }
        let fresh = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        cell.set(fresh);
        fresh
    })
}

/// The 64-bit finalizer from MurmurHash3, used to spread thread ids across
/// the implicit-producer hash table.
#[inline]
pub(crate) fn murmur3_finalizer(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn thread_id_is_cached_per_thread() {
        let a = current_thread_id();
        let b = current_thread_id();
        assert_eq!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn distinct_threads_get_distinct_ids() {
        let a = current_thread_id();
        let b = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn finalizer_spreads_sequential_inputs() {
        let hashes: HashSet<u64> = (0..64).map(murmur3_finalizer).collect();
        assert_eq!(hashes.len(), 64);
    }
}
