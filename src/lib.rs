//! A lock-free, multi-producer multi-consumer queue with bounded growth and
//! an optional blocking wrapper.
//!
//! Producers attach either *implicitly*, by thread identity, the first time
//! a thread calls [`ConcurrentQueue::enqueue`], or *explicitly*, by holding a
//! [`ProducerToken`] obtained from [`ConcurrentQueue::create_producer_token`].
//! Consumers may read without a token (a size-ranked heuristic picks which
//! sub-queue to drain from) or with a [`ConsumerToken`], which spreads reads
//! fairly across explicit producers by periodically rotating.
//!
//! ```
//! use lockfree_mpmc::ConcurrentQueue;
//!
//! let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
//! q.enqueue(1);
//! q.enqueue(2);
//! assert_eq!(q.try_dequeue(), Some(1));
//! ```
//!
//! [`BlockingConcurrentQueue`] layers a lightweight semaphore over the same
//! machinery for callers that want to block until an element is available.

mod block;
mod blocking;
mod freelist;
mod hash;
mod index;
mod pool;
mod producer;
mod queue;
mod registry;
mod semaphore;
mod token;
mod traits;

pub use blocking::{BlockingConcurrentQueue, BlockingConcurrentQueueBuilder};
pub use queue::{ConcurrentQueue, ConcurrentQueueBuilder};
pub use token::{ConsumerToken, ProducerToken};
pub use traits::{DefaultQueueTraits, QueueTraits};
