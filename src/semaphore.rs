//! Lightweight spin-then-sleep counting semaphore, spec.md §3/§4.8.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::time::Duration;

use crate::traits::QueueTraits;

#[cfg(target_os = "linux")]
mod os {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    /// Raw non-negative counting semaphore backed directly by a Linux futex,
    /// mirroring the approach in `libc`-based futex wrappers: the same word
    /// used for the wait/wake syscalls also holds the count.
    pub(super) struct RawSema {
        word: AtomicI32,
    }

    impl RawSema {
        pub(super) fn new() -> Self {
            RawSema { word: AtomicI32::new(0) }
        }

        pub(super) fn signal(&self, count: usize) {
            self.word.fetch_add(count as i32, Ordering::Release);
            let to_wake = count.min(i32::MAX as usize) as i32;
            unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    &self.word as *const _ as *const i32,
                    libc::FUTEX_WAKE,
                    to_wake,
                    std::ptr::null::<libc::timespec>(),
                );
            }
        }

        /// Blocks until the word is positive, then claims one unit. Returns
        /// `false` if `timeout` elapses first.
        pub(super) fn wait(&self, timeout: Option<Duration>) -> bool {
            let deadline = timeout.map(|d| std::time::Instant::now() + d);
            loop {
                let v = self.word.load(Ordering::Acquire);
                if v > 0 {
                    if self
                        .word
                        .compare_exchange(v, v - 1, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        return true;
                    }
                    continue;
                }
                let remaining = match deadline {
                    Some(d) => {
                        let now = std::time::Instant::now();
                        if now >= d {
                            return false;
                        }
                        Some(d - now)
                    }
                    None => None,
                };
                let ts = remaining.map(|r| libc::timespec {
                    tv_sec: r.as_secs() as libc::time_t,
                    tv_nsec: r.subsec_nanos() as libc::c_long,
                });
                let ts_ptr = ts
                    .as_ref()
                    .map(|t| t as *const libc::timespec)
                    .unwrap_or(std::ptr::null());
                unsafe {
                    libc::syscall(
                        libc::SYS_futex,
                        &self.word as *const _ as *const i32,
                        libc::FUTEX_WAIT,
                        0,
                        ts_ptr,
                    );
                }
                // Either woken, spuriously returned, or timed out (ETIMEDOUT);
                // re-check the word and the deadline at the top of the loop.
                if let Some(d) = deadline {
                    if std::time::Instant::now() >= d && self.word.load(Ordering::Acquire) <= 0 {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod os {
    use parking_lot::{Condvar, Mutex};
    use std::time::Duration;

    pub(super) struct RawSema {
        count: Mutex<i64>,
        condvar: Condvar,
    }

    impl RawSema {
        pub(super) fn new() -> Self {
            RawSema {
                count: Mutex::new(0),
                condvar: Condvar::new(),
            }
        }

        pub(super) fn signal(&self, count: usize) {
            let mut guard = self.count.lock();
            *guard += count as i64;
            drop(guard);
            if count == 1 {
                self.condvar.notify_one();
            } else {
                self.condvar.notify_all();
            }
        }

        pub(super) fn wait(&self, timeout: Option<Duration>) -> bool {
            let mut guard = self.count.lock();
            let deadline = timeout.map(|d| std::time::Instant::now() + d);
            while *guard <= 0 {
                match deadline {
                    None => self.condvar.wait(&mut guard),
                    Some(d) => {
                        let now = std::time::Instant::now();
                        if now >= d {
                            return false;
                        }
                        let timed_out = self.condvar.wait_for(&mut guard, d - now).timed_out();
                        if timed_out && *guard <= 0 {
                            return false;
                        }
                    }
                }
            }
            *guard -= 1;
            true
        }
    }
}

/// The full moodycamel-style lightweight semaphore: an `isize` count that
/// may go negative (tracking waiters), a bounded spin before falling back to
/// `os::RawSema`'s kernel sleep. Used only by [`crate::blocking`].
pub(crate) struct LightweightSemaphore<C: QueueTraits> {
    count: AtomicIsize,
    sema: os::RawSema,
    _config: PhantomData<C>,
}

impl<C: QueueTraits> LightweightSemaphore<C> {
    pub(crate) fn new() -> Self {
        LightweightSemaphore {
            count: AtomicIsize::new(0),
            sema: os::RawSema::new(),
            _config: PhantomData,
        }
    }

    pub(crate) fn try_wait(&self) -> bool {
        let mut old = self.count.load(Ordering::Relaxed);
        while old > 0 {
            match self
                .count
                .compare_exchange_weak(old, old - 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(cur) => old = cur,
            }
        }
        false
    }

    pub(crate) fn try_wait_many(&self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let mut old = self.count.load(Ordering::Relaxed);
        loop {
            if old <= 0 {
                return 0;
            }
            let take = (old as usize).min(max);
            match self.count.compare_exchange_weak(
                old,
                old - take as isize,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return take,
                Err(cur) => old = cur,
            }
        }
    }

    fn wait_with_spin(&self, timeout: Option<Duration>) -> bool {
        for _ in 0..C::MAX_SEMA_SPINS {
            if self.try_wait() {
                return true;
            }
            std::hint::spin_loop();
        }
        let old = self.count.fetch_sub(1, Ordering::Acquire);
        if old > 0 {
            return true;
        }
        if self.sema.wait(timeout) {
            true
        } else {
            self.count.fetch_add(1, Ordering::Release);
            false
        }
    }

    /// Indefinite wait.
    pub(crate) fn wait(&self) -> bool {
        self.wait_with_spin(None)
    }

    /// `timeout_usecs < 0` waits indefinitely, `== 0` behaves as `try_wait`,
    /// `> 0` bounds the wait (spec.md §4.8 "Timeout semantics").
    pub(crate) fn wait_for(&self, timeout_usecs: i64) -> bool {
        if timeout_usecs == 0 {
            self.try_wait()
        } else if timeout_usecs < 0 {
            self.wait()
        } else {
            self.wait_with_spin(Some(Duration::from_micros(timeout_usecs as u64)))
        }
    }

    pub(crate) fn wait_many(&self, max: usize, timeout_usecs: i64) -> usize {
        if max == 0 {
            return 0;
        }
        let got = self.try_wait_many(max);
        if got > 0 {
            return got;
        }
        if self.wait_for(timeout_usecs) {
            1 + self.try_wait_many(max - 1)
        } else {
            0
        }
    }

    pub(crate) fn signal(&self, n: isize) {
        if n <= 0 {
            return;
        }
        let old = self.count.fetch_add(n, Ordering::Release);
        let to_release = (-old).min(n).max(0);
        if to_release > 0 {
            self.sema.signal(to_release as usize);
        }
    }

    pub(crate) fn available_approx(&self) -> usize {
        self.count.load(Ordering::Relaxed).max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DefaultQueueTraits;

    #[test]
    fn signal_then_try_wait_succeeds() {
        let sema: LightweightSemaphore<DefaultQueueTraits> = LightweightSemaphore::new();
        sema.signal(1);
        assert!(sema.try_wait());
        assert!(!sema.try_wait());
    }

    #[test]
    fn try_wait_on_empty_fails_without_blocking() {
        let sema: LightweightSemaphore<DefaultQueueTraits> = LightweightSemaphore::new();
        assert!(!sema.try_wait());
    }

    #[test]
    fn zero_timeout_behaves_as_try_wait() {
        let sema: LightweightSemaphore<DefaultQueueTraits> = LightweightSemaphore::new();
        assert!(!sema.wait_for(0));
        sema.signal(1);
        assert!(sema.wait_for(0));
    }

    #[test]
    fn try_wait_many_caps_at_available() {
        let sema: LightweightSemaphore<DefaultQueueTraits> = LightweightSemaphore::new();
        sema.signal(3);
        assert_eq!(sema.try_wait_many(10), 3);
    }
}
