use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

/// A value protected by the lock word `R`.
///
/// Allocator state lives in one of these; the data is only reachable
/// through a guard, and the guard releases `R` when dropped.
pub struct Mutex<T, R> {
    raw: R,
    cell: UnsafeCell<T>,
}

// The lock serializes every access to `cell`.
unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}
unsafe impl<T: Send, R: Send> Send for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            cell: UnsafeCell::new(value),
        }
    }

    /// Exclusive access without locking; `&mut self` rules out contention.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Spin until the lock is acquired.
    ///
    /// Interrupts stay enabled; state shared with an interrupt handler must
    /// use [`lock_irq`](Self::lock_irq) instead.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.raw_lock();
        MutexGuard { m: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw.raw_try_lock().then(|| MutexGuard { m: self })
    }

    /// Run `f` under the lock with IRQs masked.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock_irq();
        f(&mut guard)
    }
}

impl<T, R> fmt::Debug for Mutex<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").finish_non_exhaustive()
    }
}

/// Access to a locked [`Mutex`]; unlocks on drop.
pub struct MutexGuard<'a, T, R: RawUnlock> {
    m: &'a Mutex<T, R>,
}

impl<T, R: RawUnlock> Deref for MutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.m.cell.get() }
    }
}

impl<T, R: RawUnlock> DerefMut for MutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.m.cell.get() }
    }
}

impl<T, R: RawUnlock> Drop for MutexGuard<'_, T, R> {
    fn drop(&mut self) {
        unsafe { self.m.raw.raw_unlock() }
    }
}

#[cfg(test)]
mod tests {
    use crate::SpinMutex;

    #[test]
    fn guard_releases_on_drop() {
        let m = SpinMutex::new(1_u32);
        {
            let mut g = m.lock();
            *g += 1;
            assert!(m.try_lock().is_none());
        }
        assert_eq!(*m.try_lock().unwrap(), 2);
        assert_eq!(m.with_lock(|v| *v * 10), 20);
        assert_eq!(m.into_inner(), 2);
    }

    #[test]
    fn failed_try_lock_leaves_the_holder_in_place() {
        let m = SpinMutex::new(0_u8);
        let held = m.lock();
        assert!(m.try_lock().is_none());
        assert!(m.try_lock().is_none());
        drop(held);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn counts_are_exact_under_contention() {
        let m = SpinMutex::new(0_u64);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        *m.lock_irq() += 1;
                    }
                });
            }
        });
        assert_eq!(*m.lock(), 40_000);
    }
}
