use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use lockfree_mpmc::{BlockingConcurrentQueue, ConcurrentQueue};

#[test]
fn spsc_ordering() {
    let q: Arc<ConcurrentQueue<i32>> = Arc::new(ConcurrentQueue::new());
    let producer = {
        let q = q.clone();
        thread::spawn(move || {
            for i in 0..10_000 {
                while !q.enqueue(i) {
                    std::hint::spin_loop();
                }
            }
        })
    };
    let mut out = Vec::with_capacity(10_000);
    while out.len() < 10_000 {
        if let Some(v) = q.try_dequeue() {
            out.push(v);
        } else {
            std::hint::spin_loop();
        }
    }
    producer.join().unwrap();
    let expected: Vec<i32> = (0..10_000).collect();
    assert_eq!(out, expected);
}

#[test]
fn mpmc_totality() {
    const PER_PRODUCER: i32 = 100_000;
    const PRODUCERS: i32 = 4;
    const CONSUMERS: usize = 4;

    let q: Arc<ConcurrentQueue<i32>> = Arc::new(ConcurrentQueue::new());
    let producers_done = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new((PRODUCERS as usize) + CONSUMERS));

    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
        let q = q.clone();
        let done = producers_done.clone();
        let start = start.clone();
        handles.push(thread::spawn(move || {
            start.wait();
            let base = p * PER_PRODUCER;
            for i in 0..PER_PRODUCER {
                let v = base + i;
                while !q.enqueue(v) {
                    std::hint::spin_loop();
                }
            }
            done.fetch_add(1, Ordering::Release);
        }));
    }

    let mut consumer_handles = Vec::new();
    for _ in 0..CONSUMERS {
        let q = q.clone();
        let done = producers_done.clone();
        let start = start.clone();
        consumer_handles.push(thread::spawn(move || {
            start.wait();
            let mut local = Vec::new();
            loop {
                match q.try_dequeue() {
                    Some(v) => local.push(v),
                    None => {
                        if done.load(Ordering::Acquire) as i32 == PRODUCERS && q.is_empty() {
                            break;
                        }
                        std::hint::spin_loop();
                    }
                }
            }
            local
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let mut all = Vec::new();
    for h in consumer_handles {
        let local = h.join().unwrap();
        // Per-producer sub-sequences preserve increasing order within each
        // consumer's local list.
        let mut last_per_producer = vec![i32::MIN; PRODUCERS as usize];
        for &v in &local {
            let p = (v / PER_PRODUCER) as usize;
            assert!(v > last_per_producer[p], "producer {p} order violated");
            last_per_producer[p] = v;
        }
        all.extend(local);
    }

    // Drain anything left behind (a consumer may have exited right before
    // the last few elements landed).
    while let Some(v) = q.try_dequeue() {
        all.push(v);
    }

    assert_eq!(all.len() as i32, PRODUCERS * PER_PRODUCER);
    let set: HashSet<i32> = all.into_iter().collect();
    assert_eq!(set.len() as i32, PRODUCERS * PER_PRODUCER);
    for v in 0..(PRODUCERS * PER_PRODUCER) {
        assert!(set.contains(&v), "missing value {v}");
    }
}

#[test]
fn bulk_atomic_visibility() {
    let q: ConcurrentQueue<i32> = ConcurrentQueue::new();
    assert!(q.enqueue_bulk(vec![10, 11, 12, 13, 14]));
    let mut out = Vec::new();
    while out.len() < 5 {
        if let Some(v) = q.try_dequeue() {
            out.push(v);
        }
    }
    assert_eq!(out, vec![10, 11, 12, 13, 14]);
    assert_eq!(q.size_approx(), 0);
    assert!(q.is_empty());
}

#[test]
fn token_rotation_fairness() {
    let q: Arc<ConcurrentQueue<i32>> = Arc::new(ConcurrentQueue::new());
    for i in 0..1_000 {
        assert!(q.enqueue(i));
    }

    let counts = Arc::new((AtomicUsize::new(0), AtomicUsize::new(0)));
    let total = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for idx in 0..2 {
        let q = q.clone();
        let counts = counts.clone();
        let total = total.clone();
        handles.push(thread::spawn(move || {
            let mut token = q.create_consumer_token();
            loop {
                if total.load(Ordering::Acquire) >= 1_000 {
                    break;
                }
                if let Some(_v) = q.try_dequeue_with_token(&mut token) {
                    if idx == 0 {
                        counts.0.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counts.1.fetch_add(1, Ordering::Relaxed);
                    }
                    total.fetch_add(1, Ordering::Relaxed);
                } else if q.is_empty() {
                    break;
                } else {
                    std::hint::spin_loop();
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let a = counts.0.load(Ordering::Relaxed);
    let b = counts.1.load(Ordering::Relaxed);
    assert_eq!(a + b, 1_000);
}

#[test]
fn blocking_timeout() {
    let q: BlockingConcurrentQueue<i32> = BlockingConcurrentQueue::new();
    let start = Instant::now();
    let result = q.wait_dequeue_timed(50_000);
    let elapsed = start.elapsed();
    assert!(result.is_none());
    assert!(elapsed.as_millis() >= 30, "returned suspiciously early: {elapsed:?}");
    assert!(elapsed.as_millis() < 500, "took far longer than the timeout: {elapsed:?}");
}

#[test]
fn blocking_wrapper_wakes_on_signal() {
    let q: Arc<BlockingConcurrentQueue<i32>> = Arc::new(BlockingConcurrentQueue::new());
    let reader = {
        let q = q.clone();
        thread::spawn(move || q.wait_dequeue())
    };
    thread::sleep(std::time::Duration::from_millis(10));
    assert!(q.enqueue(42));
    let v = reader.join().unwrap();
    assert_eq!(v, 42);
}
