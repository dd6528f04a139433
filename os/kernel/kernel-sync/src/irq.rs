//! Per-context interrupt state.
//!
//! Each execution context carries an interrupt-enable flag and a nesting
//! counter. [`push_off`] disables interrupts and remembers whether they were
//! on before the outermost call; the matching [`pop_off`] restores them once
//! the nesting depth drops back to zero. Spin-lock holders keep interrupts
//! off for as long as any lock is held.

use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::cell::Cell;
use core::marker::PhantomData;

struct IrqState {
    enabled: Cell<bool>,
    /// Depth of `push_off` nesting.
    noff: Cell<u32>,
    /// Were interrupts enabled before the outermost `push_off`?
    intena: Cell<bool>,
}

std::thread_local! {
    static STATE: IrqState = const {
        IrqState {
            enabled: Cell::new(true),
            noff: Cell::new(0),
            intena: Cell::new(false),
        }
    };
}

/// Whether interrupts are enabled on the calling context.
#[inline]
#[must_use]
pub fn intr_get() -> bool {
    STATE.with(|s| s.enabled.get())
}

#[inline]
pub fn intr_on() {
    STATE.with(|s| s.enabled.set(true));
}

#[inline]
pub fn intr_off() {
    STATE.with(|s| s.enabled.set(false));
}

/// Current `push_off` nesting depth of the calling context.
#[inline]
#[must_use]
pub fn depth() -> u32 {
    STATE.with(|s| s.noff.get())
}

/// Disables interrupts, counting nested calls.
pub fn push_off() {
    STATE.with(|s| {
        let old = s.enabled.get();
        s.enabled.set(false);
        if s.noff.get() == 0 {
            s.intena.set(old);
        }
        s.noff.set(s.noff.get() + 1);
    });
}

/// Undoes one [`push_off`].
///
/// # Panics
/// Panics if interrupts are enabled (someone turned them on inside a
/// critical section) or if there is no matching `push_off`.
pub fn pop_off() {
    STATE.with(|s| {
        assert!(!s.enabled.get(), "pop_off: interruptible");
        let noff = s.noff.get();
        assert!(noff >= 1, "pop_off: unbalanced");
        s.noff.set(noff - 1);
        if noff == 1 && s.intena.get() {
            s.enabled.set(true);
        }
    });
}

/// RAII guard around [`push_off`]/[`pop_off`].
///
/// Bound to the context that created it.
pub struct IrqGuard {
    _not_send: PhantomData<*const ()>,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        push_off();
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        pop_off();
    }
}

/// A mutex guard that also keeps interrupts disabled while held.
///
/// Created by [`Mutex::lock_irq`]. Fields drop in declaration order, so the
/// lock is released before interrupts can come back on.
pub struct IrqMutex<'a, T, R: RawLock + RawUnlock> {
    g: MutexGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock + RawUnlock> core::ops::Deref for IrqMutex<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.g
    }
}

impl<T, R: RawLock + RawUnlock> core::ops::DerefMut for IrqMutex<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.g
    }
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Acquires the mutex with interrupts disabled for the guard's lifetime.
    ///
    /// Interrupts go off before spinning starts, so a handler on this
    /// context can never find the lock taken by the code it interrupted.
    #[inline]
    pub fn lock_irq(&self) -> IrqMutex<'_, T, R> {
        let ig = IrqGuard::new();
        let g = self.lock();
        IrqMutex { g, _irq: ig }
    }

    /// Non-blocking [`Mutex::lock_irq`].
    #[inline]
    pub fn try_lock_irq(&self) -> Option<IrqMutex<'_, T, R>> {
        let ig = IrqGuard::new();
        let g = self.try_lock()?;
        Some(IrqMutex { g, _irq: ig })
    }
}
