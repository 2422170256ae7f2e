use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::ops::{Deref, DerefMut};

/// A mutex guard that also masks IRQs on the local core while held.
///
/// `IrqMutex` combines an interrupt guard with a regular [`MutexGuard`].
/// When created via [`Mutex::lock_irq`], it:
///
/// 1. saves the current `DAIF` mask and masks IRQs, and
/// 2. acquires the underlying mutex,
///
/// releasing them in reverse order on drop.
///
/// This prevents an interrupt handler on the same core from re-entering
/// code that uses the same lock and spinning on it forever.
///
/// # Examples
///
/// ```no_run
/// use kernel_sync::SpinMutex;
///
/// let m = SpinMutex::new(0_u64);
/// {
///     let mut g = m.lock_irq();
///     *g += 1;
/// }
/// // mutex released, previous interrupt mask restored
/// ```
pub struct IrqMutex<'a, T, R: RawLock + RawUnlock> {
    // Field order matters: the lock is released before interrupts are restored.
    g: MutexGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Acquires the mutex with IRQs masked for the guard's lifetime.
    ///
    /// This constructs an [`IrqGuard`] to save and mask interrupts, then
    /// acquires the mutex and returns a paired [`IrqMutex`] guard. Dropping
    /// the guard releases the mutex and restores the previous mask.
    #[inline]
    pub fn lock_irq(&self) -> IrqMutex<'_, T, R> {
        let ig = IrqGuard::new();
        let g = self.lock();
        IrqMutex { g, _irq: ig }
    }
}

impl<T, R: RawLock + RawUnlock> Deref for IrqMutex<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.g
    }
}

impl<T, R: RawLock + RawUnlock> DerefMut for IrqMutex<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.g
    }
}

/// `DAIF.I`, the IRQ mask bit.
pub const DAIF_IRQ: u64 = 1 << 7;

/// Reads the `DAIF` interrupt mask register.
///
/// # Platform
///
/// On bare-metal `aarch64` this reads the register; elsewhere (host tests)
/// there is no interrupt state to observe and `0` is returned.
#[inline]
#[must_use]
pub fn daif() -> u64 {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    {
        let r: u64;
        unsafe { core::arch::asm!("mrs {}, daif", out(reg) r, options(nomem, nostack, preserves_flags)) }
        r
    }
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    {
        0
    }
}

/// Masks IRQs on the local core (`msr daifset, #2`).
///
/// # Safety & Privilege
///
/// Must only be called at EL1 or higher.
#[inline]
pub fn mask_irqs() {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        core::arch::asm!("msr daifset, #2", options(nomem, nostack, preserves_flags));
    }
}

/// Unmasks IRQs on the local core (`msr daifclr, #2`).
///
/// # Safety & Privilege
///
/// Must only be called at EL1 or higher. Typically used to restore a
/// previously saved interrupt state.
#[inline]
pub fn unmask_irqs() {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        core::arch::asm!("msr daifclr, #2", options(nomem, nostack, preserves_flags));
    }
}

/// RAII guard that masks IRQs on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots `DAIF.I`. If IRQs were unmasked, it masks
/// them. On drop, it unmasks **only** if they were unmasked before,
/// preserving the original state across nested guards.
pub struct IrqGuard {
    /// Whether IRQs were unmasked when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    /// Masks IRQs if they are currently unmasked and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = (daif() & DAIF_IRQ) == 0;
        if enabled {
            mask_irqs();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether this guard will unmask IRQs when dropped.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            unmask_irqs();
        }
    }
}
