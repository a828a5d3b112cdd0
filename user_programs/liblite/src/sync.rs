//! User-space synchronization built on the `futex_wait`/`futex_wake`
//! syscalls. The counting [`Semaphore`] is the same Mesa-semantics design as
//! the kernel's own `crate::sync::Semaphore` (negative count == number of
//! blocked waiters); [`Mutex`] is a three-state (free/held/contended) futex
//! lock, since a plain binary semaphore would wake every waiter on every
//! unlock instead of only the ones that actually contended.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::syscall;

const FREE: u32 = 0;
const HELD: u32 = 1;
const CONTENDED: u32 = 2;

/// A mutual-exclusion lock with an uncontended fast path: `lock` only makes
/// a syscall at all once it has already failed to CAS the word straight
/// from `FREE` to `HELD`. `unlock` only wakes a waiter if the word was ever
/// seen at `CONTENDED`, so an uncontended lock/unlock pair never traps into
/// the kernel.
pub struct Mutex<T> {
    state: AtomicU32,
    value: UnsafeCell<T>,
}

// SAFETY: `MutexGuard` is the only way to reach `value`, and holding one
// implies `state` was successfully moved out of `FREE`.
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(FREE),
            value: UnsafeCell::new(value),
        }
    }

    fn key(&self) -> *const u32 {
        core::ptr::addr_of!(self.state) as *const u32
    }

    /// Acquires the lock, blocking via `futex_wait` if it is already held.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        if self.state.compare_exchange(FREE, HELD, Ordering::Acquire, Ordering::Acquire).is_err() {
            while self.state.swap(CONTENDED, Ordering::Acquire) != FREE {
                syscall::futex_wait(self.key(), CONTENDED);
            }
        }
        MutexGuard { mutex: self }
    }

    fn unlock(&self) {
        if self.state.swap(FREE, Ordering::Release) == CONTENDED {
            syscall::futex_wake(self.key());
        }
    }
}

/// RAII guard returned by [`Mutex::lock`].
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means `state` is `HELD` or `CONTENDED`,
        // so no other guard for this mutex can exist concurrently.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref`.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// A counting semaphore: `wait` decrements and blocks only when the
/// decrement crosses zero (the same negative-count-means-waiters design as
/// the kernel's own semaphore), `signal` increments and wakes one waiter
/// only when the increment crosses back up from a negative count. Used by
/// the producer/consumer program for both its "slots free" and "items
/// available" counts.
pub struct Semaphore {
    count: AtomicI32,
}

impl Semaphore {
    /// Creates a semaphore with the given initial count.
    pub const fn new(initial: i32) -> Self {
        Self { count: AtomicI32::new(initial) }
    }

    fn key(&self) -> *const u32 {
        core::ptr::addr_of!(self.count) as *const u32
    }

    /// Decrements the count; blocks if the result went negative.
    pub fn wait(&self) {
        loop {
            let before = self.count.fetch_sub(1, Ordering::Acquire);
            if before > 0 {
                return;
            }
            let now = (before - 1) as u32;
            syscall::futex_wait(self.key(), now);
        }
    }

    /// Increments the count and wakes one waiter if any were blocked.
    pub fn signal(&self) {
        let before = self.count.fetch_add(1, Ordering::Release);
        if before < 0 {
            syscall::futex_wake(self.key());
        }
    }
}
