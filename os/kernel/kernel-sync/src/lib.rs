//! # Kernel synchronization primitives
//!
//! Two kinds of locks, matching the two kinds of critical sections in the
//! memory-management code:
//!
//! * [`SpinMutex`]: busy-waits. Use [`Mutex::lock_irq`] for sections that an
//!   interrupt handler on the same execution context could also enter; the
//!   guard keeps interrupts off until the lock is released. Critical
//!   sections must be short and must never block.
//! * [`SleepMutex`]: suspends the caller while the lock is contended. Use it
//!   for state held across slow operations such as a disk transfer or a
//!   file write-back. It remembers which execution context holds it.
//!
//! ## Lock ordering
//!
//! The primitives do not enforce an order. Callers must: never acquire a
//! [`SleepMutex`] while holding a [`SpinMutex`] (only `try_lock` is allowed
//! there), and document any order between spin locks they nest.
//!
//! ## Hosted execution
//!
//! Execution contexts are OS threads. The per-context interrupt-enable flag
//! is emulated in [`irq`] so the `push_off`/`pop_off` discipline keeps
//! its meaning and can be asserted on.

#![allow(unsafe_code)]

mod context;
pub mod irq;
mod mutex;
mod raw_spin;
mod sleep_mutex;

pub use context::{ContextId, current_context};
pub use irq::{IrqGuard, IrqMutex};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use sleep_mutex::{SleepMutex, SleepMutexGuard};

pub type SpinMutex<T> = Mutex<T, RawSpin>;
pub type SpinMutexGuard<'a, T> = MutexGuard<'a, T, RawSpin>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }

    /// Whether the calling context holds the lock.
    #[must_use]
    pub fn holding(&self) -> bool {
        self.raw().holding()
    }

    #[must_use]
    pub fn holder(&self) -> Option<ContextId> {
        self.raw().holder()
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
    fn raw_is_locked(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The caller must hold the lock.
    unsafe fn raw_unlock(&self);
}
