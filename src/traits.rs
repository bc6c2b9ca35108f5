//! Compile-time configuration for a [`crate::ConcurrentQueue`].
//!
//! The original implementation this crate generalizes took these as
//! non-type template parameters on the queue class. Rust has no direct
//! equivalent, so they are expressed as associated constants on a trait;
//! an embedder picks configuration at the type level by choosing `C` in
//! `ConcurrentQueue<T, C>`.

/// Compile-time configuration knobs, see spec.md §6.
pub trait QueueTraits: 'static {
    /// Slots per block. Must be a power of two ≥ 2.
    const BLOCK_SIZE: usize = 32;

    /// Flags-vs-counter cutoff for block emptiness tracking. Must be a
    /// power of two > 1.
    const EXPLICIT_BLOCK_EMPTY_COUNTER_THRESHOLD: usize = 32;

    /// Starting block-index size for explicit producers. Power of two > 1.
    const EXPLICIT_INITIAL_INDEX_SIZE: usize = 32;

    /// Starting block-index size for implicit producers. Power of two > 1.
    const IMPLICIT_INITIAL_INDEX_SIZE: usize = 32;

    /// Starting size of the implicit-producer thread-id hash. Power of two,
    /// or 0 to disable implicit production entirely.
    const INITIAL_IMPLICIT_PRODUCER_HASH_SIZE: usize = 256;

    /// Items a consumer token consumes from one producer before the global
    /// rotation counter advances.
    const EXPLICIT_CONSUMER_CONSUMPTION_QUOTA_BEFORE_ROTATE: usize = 256;

    /// Upper bound per sub-queue, enforced at block granularity (so the
    /// effective limit may exceed this by up to `BLOCK_SIZE - 1`).
    const MAX_SUBQUEUE_SIZE: usize = usize::MAX;

    /// Spin iterations the lightweight semaphore attempts before sleeping.
    const MAX_SEMA_SPINS: usize = 10_000;

    /// Whether a heap-allocated block, once its producer is done with it,
    /// returns to the free list for reuse (`true`) or is retired from
    /// circulation (`false`). See SPEC_FULL.md §3 "Arena ownership".
    const RECYCLE_ALLOCATED_BLOCKS: bool = true;

    /// Derived: whether blocks of this size track emptiness with a single
    /// completion counter (large blocks) or one flag per slot (small
    /// blocks). See spec.md §4.1.
    const COUNTER_MODE: bool = Self::BLOCK_SIZE > Self::EXPLICIT_BLOCK_EMPTY_COUNTER_THRESHOLD;
}

/// The canonical configuration, matching the defaults documented in
/// spec.md §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQueueTraits;

impl QueueTraits for DefaultQueueTraits {}
