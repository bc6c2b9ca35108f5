use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use lockfree_mpmc::ConcurrentQueue;

/// Randomized mixed single/bulk workload across producers and consumers,
/// checking only totality (spec.md §8 "MPMC totality") since ordering
/// across differently-sized bulk chunks isn't itself a spec'd property.
#[test]
fn randomized_mixed_workload_preserves_totality() {
    fastrand::seed(12345);
    const PRODUCERS: usize = 3;
    const PER_PRODUCER: usize = 5_000;

    let q: Arc<ConcurrentQueue<usize>> = Arc::new(ConcurrentQueue::new());
    let consumed = Arc::new(AtomicUsize::new(0));
    let total = PRODUCERS * PER_PRODUCER;

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let q = q.clone();
        producers.push(thread::spawn(move || {
            let base = p * PER_PRODUCER;
            let mut i = 0;
            while i < PER_PRODUCER {
                if fastrand::bool() && PER_PRODUCER - i >= 4 {
                    let chunk: Vec<usize> = (base + i..base + i + 4).collect();
                    while !q.enqueue_bulk(chunk.clone()) {
                        std::hint::spin_loop();
                    }
                    i += 4;
                } else {
                    while !q.enqueue(base + i) {
                        std::hint::spin_loop();
                    }
                    i += 1;
                }
            }
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..2 {
        let q = q.clone();
        let consumed = consumed.clone();
        consumers.push(thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                if let Some(v) = q.try_dequeue() {
                    seen.push(v);
                    consumed.fetch_add(1, Ordering::Relaxed);
                } else if consumed.load(Ordering::Acquire) >= total {
                    break;
                } else {
                    std::hint::spin_loop();
                }
            }
            seen
        }));
    }

    for p in producers {
        p.join().unwrap();
    }

    let mut all = Vec::new();
    for c in consumers {
        all.extend(c.join().unwrap());
    }
    all.sort_unstable();
    let expected: Vec<usize> = (0..total).collect();
    assert_eq!(all, expected);
}
