//! Kernel-side synchronization primitives.
//!
//! This is a uniprocessor kernel: there is never a second CPU to race with,
//! only interrupts. `IrqLock` is therefore "no busy-waiting" by construction
//! -- it just disables interrupts for the critical section. `Semaphore` and
//! `Mutex` layer blocking wait queues on top of the scheduler for the cases
//! where a kernel thread must wait on another kernel thread.

use core::ops::{Deref, DerefMut};

use crate::cpu;

/// A lock that protects its contents by disabling interrupts for the
/// duration of the borrow. Used around compound edits to the PMM bitmap,
/// process list, and wait queues.
pub struct IrqLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> IrqLock<T> {
    /// Creates a new lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// Locks, disabling interrupts until the guard is dropped.
    pub fn lock(&self) -> IrqLockGuard<'_, T> {
        let were_enabled = cpu::interrupts_enabled();
        cpu::disable_interrupts();
        IrqLockGuard {
            guard: self.inner.lock(),
            were_enabled,
        }
    }
}

/// RAII guard returned by [`IrqLock::lock`]. Restores the interrupt flag to
/// whatever it was before the lock was taken, so nested `IrqLock`s (or a
/// lock taken from an already-interrupts-off context, such as an ISR) never
/// re-enable interrupts early.
pub struct IrqLockGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
    were_enabled: bool,
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqLockGuard<'_, T> {
    fn drop(&mut self) {
        if self.were_enabled {
            cpu::enable_interrupts();
        }
    }
}

/// A counting semaphore with a FIFO wait queue, Mesa semantics (a waiter
/// re-checks the count after being woken rather than assuming it won, since
/// another waiter may have raced it to the same signal).
///
/// Blocking and waking both key off this semaphore's own address, reusing
/// the same [`crate::task::BlockReason::Futex`] mechanism the user-space
/// futex syscalls use -- a kernel semaphore and a futex are the same
/// "block until a value at this address changes" primitive, just invoked
/// from kernel code instead of a syscall.
pub struct Semaphore {
    count: IrqLock<isize>,
}

impl Semaphore {
    /// Creates a semaphore with the given initial count.
    #[must_use]
    pub const fn new(initial: isize) -> Self {
        Self {
            count: IrqLock::new(initial),
        }
    }

    fn key(&self) -> u32 {
        core::ptr::addr_of!(self.count) as u32
    }

    /// Decrements the count; blocks the calling thread if it was already
    /// zero or negative.
    ///
    /// The decrement and the transition to `Blocked` run as one
    /// interrupts-disabled step (`cpu::without_interrupts` stays in effect
    /// across the `block_current` call, not just the count update): a
    /// preemption landing between them would let a concurrent `signal` see
    /// the already-negative count, decide a waiter exists, and call
    /// `wake_one_matching` before this thread is actually `Blocked`,
    /// losing the wakeup.
    pub fn wait(&self) {
        loop {
            let blocked = cpu::without_interrupts(|| {
                {
                    let mut count = self.count.lock();
                    if *count > 0 {
                        *count -= 1;
                        return false;
                    }
                    *count -= 1;
                }
                crate::task::scheduler::block_current(crate::task::BlockReason::Futex(self.key()));
                true
            });
            if !blocked {
                return;
            }
        }
    }

    /// Increments the count and wakes one waiter, if any were blocked.
    pub fn signal(&self) {
        let should_wake = {
            let mut count = self.count.lock();
            *count += 1;
            *count <= 0
        };
        if should_wake {
            crate::task::wake_one_matching(crate::task::BlockReason::Futex(self.key()));
        }
    }

    #[cfg(test)]
    fn count(&self) -> isize {
        *self.count.lock()
    }
}

/// A binary semaphore with owner tracking. `lock`/
/// `unlock` are the kernel-side counterpart to the user-space three-state
/// futex mutex in `liblite`; this one is only ever contended by kernel
/// threads (there are few enough that a full CAS fast path is not worth
/// the complexity a uniprocessor kernel would gain nothing from).
pub struct Mutex {
    sem: Semaphore,
    holder: IrqLock<Option<crate::task::Pid>>,
}

impl Mutex {
    /// Creates an initially-unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
            holder: IrqLock::new(None),
        }
    }

    /// Acquires the mutex, blocking if it is already held, and records the
    /// calling thread as the holder.
    pub fn lock(&self) {
        self.sem.wait();
        *self.holder.lock() = Some(crate::task::current_pid());
    }

    /// Releases the mutex, clearing the recorded holder.
    pub fn unlock(&self) {
        *self.holder.lock() = None;
        self.sem.signal();
    }

    /// The PID currently holding this mutex, if any.
    #[must_use]
    pub fn holder(&self) -> Option<crate::task::Pid> {
        *self.holder.lock()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An uncontended `wait`/`signal` pair (the only path these tests can
    /// exercise without standing up a second kernel thread and a real
    /// scheduler run) must round-trip the count without ever reaching the
    /// `block_current` path.
    #[test_case]
    fn semaphore_wait_then_signal_round_trips_count() {
        let sem = Semaphore::new(1);
        assert_eq!(sem.count(), 1);
        sem.wait();
        assert_eq!(sem.count(), 0);
        sem.signal();
        assert_eq!(sem.count(), 1);
    }

    #[test_case]
    fn semaphore_signal_without_a_waiter_does_not_go_negative() {
        let sem = Semaphore::new(0);
        sem.signal();
        assert_eq!(sem.count(), 1);
    }

    #[test_case]
    fn mutex_starts_unlocked_with_no_holder() {
        let mutex = Mutex::new();
        assert_eq!(mutex.holder(), None);
    }

    #[test_case]
    fn mutex_tracks_holder_across_lock_and_unlock() {
        let mutex = Mutex::new();
        let caller = crate::task::current_pid();

        mutex.lock();
        assert_eq!(mutex.holder(), Some(caller));

        mutex.unlock();
        assert_eq!(mutex.holder(), None);
    }
}
