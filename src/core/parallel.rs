//! Lock-free and nearly-lock-free primitives shared by the guiding
//! structure: an atomically accumulating 32-bit float, a spin lock for
//! the short optimizer critical sections, and the abort switch the
//! pass controller honours.

// std
use std::cell::UnsafeCell;
use std::sync::atomic::AtomicBool;
// others
use atomic::{Atomic, Ordering};
// pbrt
use crate::core::gpt::Float;

// see parallel.h

/// A 32-bit float accumulated with a compare-exchange loop.
///
/// Concurrent `add` calls commute, so no ordering between recording
/// threads is required; publication to readers happens at the pass
/// barrier, which is why plain loads are relaxed.
#[derive(Debug, Default)]
pub struct AtomicFloat {
    value: Atomic<f32>,
}

impl AtomicFloat {
    pub fn new(v: Float) -> Self {
        AtomicFloat {
            value: Atomic::new(v),
        }
    }
    pub fn load(&self) -> Float {
        self.value.load(Ordering::Relaxed)
    }
    pub fn store(&self, v: Float) {
        self.value.store(v, Ordering::Relaxed);
    }
    pub fn add(&self, v: Float) {
        let mut current: f32 = self.value.load(Ordering::Relaxed);
        loop {
            match self.value.compare_exchange_weak(
                current,
                current + v,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clone for AtomicFloat {
    fn clone(&self) -> Self {
        AtomicFloat::new(self.load())
    }
}

/// A minimal test-and-set spin lock.
///
/// Held only across a handful of floating-point operations; never
/// across allocation, I/O, or another lock acquisition.
#[derive(Debug, Default)]
pub struct SpinLock<T> {
    flag: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(data: T) -> Self {
        SpinLock {
            flag: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }
    pub fn lock(&self) -> SpinLockGuard<T> {
        while self.flag.swap(true, atomic::Ordering::Acquire) {
            std::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }
    /// Consume the lock; no guard needed since exclusive access is
    /// statically guaranteed.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> std::ops::Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> std::ops::DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.flag.store(false, atomic::Ordering::Release);
    }
}

/// Cooperative cancellation flag checked at pass boundaries.
#[derive(Debug, Default)]
pub struct AbortSwitch {
    aborted: AtomicBool,
}

impl AbortSwitch {
    pub fn new() -> Self {
        AbortSwitch {
            aborted: AtomicBool::new(false),
        }
    }
    pub fn abort(&self) {
        self.aborted.store(true, atomic::Ordering::Release);
    }
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn atomic_float_concurrent_adds_commute() {
        let accum: AtomicFloat = AtomicFloat::new(0.0);
        let n_threads: usize = 8;
        let adds_per_thread: usize = 10_000;
        crossbeam::scope(|scope| {
            for _ in 0..n_threads {
                scope.spawn(|_| {
                    for _ in 0..adds_per_thread {
                        accum.add(0.25);
                    }
                });
            }
        })
        .unwrap();
        // 0.25 * 80_000 is exactly representable, so the commutative
        // sum has a single correct answer.
        assert_eq!(accum.load(), 0.25 * (n_threads * adds_per_thread) as Float);
    }

    #[test]
    fn spin_lock_serializes_increments() {
        let counter: SpinLock<i32> = SpinLock::new(0);
        crossbeam::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|_| {
                    for _ in 0..1000 {
                        let mut guard = counter.lock();
                        *guard += 1;
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(counter.into_inner(), 4000);
    }
}
