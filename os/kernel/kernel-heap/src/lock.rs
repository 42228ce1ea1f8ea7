//! # Heap Locks
//!
//! Two locks guard the heap:
//!
//! - [`AllocLock`] is the narrow reservation flag. It is held only while a
//!   header is being written and remembers the most recent reservation.
//! - [`HeapLock`] is a spin lock around an entire [`Heap`](crate::Heap). The
//!   global [`KernelHeap`](crate::KernelHeap) runs every operation inside it,
//!   with interrupts masked through [`IrqGuard`].

use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Reservation flag plus a one-entry cache of the last reservation.
#[derive(Debug, Default)]
pub struct AllocLock {
    locked: AtomicBool,
    last_address: AtomicUsize,
    last_size: AtomicUsize,
}

impl AllocLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            last_address: AtomicUsize::new(0),
            last_size: AtomicUsize::new(0),
        }
    }

    /// Takes the flag if it is free. Never spins.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Takes the flag for the lifetime of the returned guard.
    #[inline]
    pub fn try_reserve(&self) -> Option<ReservationGuard<'_>> {
        self.try_lock().then_some(ReservationGuard { lock: self })
    }

    /// The most recently reserved `(address, size)`, if any.
    #[must_use]
    pub fn last(&self) -> Option<(usize, usize)> {
        let address = self.last_address.load(Ordering::Relaxed);
        (address != 0).then(|| (address, self.last_size.load(Ordering::Relaxed)))
    }
}

/// Proof that the [`AllocLock`] flag is held; releases it on drop.
pub struct ReservationGuard<'a> {
    lock: &'a AllocLock,
}

impl ReservationGuard<'_> {
    /// Records a completed reservation in the lock's cache.
    #[inline]
    pub fn record(&self, address: usize, size: usize) {
        self.lock.last_address.store(address, Ordering::Relaxed);
        self.lock.last_size.store(size, Ordering::Relaxed);
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Spin lock serializing whole heap operations.
///
/// Acquiring masks interrupts first and the returned [`HeapLockGuard`]
/// restores them after releasing the lock, so an interrupt handler on the
/// same CPU can never spin on a heap its own CPU holds. Waiters spin on a
/// plain load and retry the exchange only once the flag reads clear.
pub struct HeapLock<T> {
    held: AtomicBool,
    heap: UnsafeCell<T>,
}

// SAFETY: `heap` is only reached through a guard, and at most one guard exists.
unsafe impl<T: Send> Sync for HeapLock<T> {}

impl<T> HeapLock<T> {
    pub const fn new(heap: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            heap: UnsafeCell::new(heap),
        }
    }

    /// Takes the lock if it is free; interrupts stay as they were otherwise.
    #[inline]
    pub fn try_lock(&self) -> Option<HeapLockGuard<'_, T>> {
        let irq = IrqGuard::new();
        self.try_acquire().then_some(HeapLockGuard { lock: self, _irq: irq })
    }

    /// Masks interrupts, then spins until the lock is taken.
    #[inline]
    pub fn lock(&self) -> HeapLockGuard<'_, T> {
        let irq = IrqGuard::new();
        while !self.try_acquire() {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        HeapLockGuard { lock: self, _irq: irq }
    }

    /// Runs `f` on the locked value.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    #[inline]
    fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

/// Exclusive access to the value behind a [`HeapLock`].
///
/// Dropping it clears the lock flag, then restores the interrupt state.
pub struct HeapLockGuard<'a, T> {
    lock: &'a HeapLock<T>,
    _irq: IrqGuard,
}

impl<T> Deref for HeapLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.heap.get() }
    }
}

impl<T> DerefMut for HeapLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &mut *self.lock.heap.get() }
    }
}

impl<T> Drop for HeapLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// On bare-metal `x86_64` it snapshots `IF` (bit 9 of `RFLAGS`), issues `cli`
/// if interrupts were enabled, and `sti` on drop only in that case. On every
/// other target it does nothing; hosted builds have no interrupts to mask.
pub struct IrqGuard {
    #[cfg_attr(not(all(target_arch = "x86_64", target_os = "none")), allow(dead_code))]
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let rflags: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) rflags, options(nostack, preserves_flags)) }
        let enabled = (rflags & (1 << 9)) != 0;
        if enabled {
            unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
        }
        Self {
            were_enabled: enabled,
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
        }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
impl IrqGuard {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            were_enabled: false,
        }
    }
}
