//! Blocking lock for long critical sections.
//!
//! Contended callers park on an [`Event`] instead of spinning. The lock
//! records which execution context holds it so owners can assert on it.

use crate::context::ContextId;
use crate::{SpinMutex, SpinMutexGuard};
use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use event_listener::{Event, Listener, listener};

pub struct SleepMutex<T> {
    lock_ops: Event,
    name: &'static str,
    base: SpinMutex<T>,
}

pub struct SleepMutexGuard<'a, T> {
    spin_guard: ManuallyDrop<SpinMutexGuard<'a, T>>,
    mutex: &'a SleepMutex<T>,
    // Unlocking from another context would break `holding`.
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for SleepMutexGuard<'_, T> {}

impl<T> SleepMutex<T> {
    pub fn new(name: &'static str, data: T) -> Self {
        Self {
            lock_ops: Event::new(),
            name,
            base: SpinMutex::new(data),
        }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.base.into_inner()
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.base.get_mut()
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Blocks until the lock is available.
    ///
    /// Must not be called while holding a spin lock.
    ///
    /// # Panics
    /// Panics if the calling context already holds the lock.
    #[inline]
    pub fn lock(&self) -> SleepMutexGuard<'_, T> {
        assert!(!self.holding(), "acquiresleep: {} already held", self.name);
        if let Some(guard) = self.try_lock() {
            return guard;
        }
        self.acquire_slow()
    }

    #[cold]
    fn acquire_slow(&self) -> SleepMutexGuard<'_, T> {
        loop {
            listener!(self.lock_ops => listener);
            // The holder may have released between the failed try and
            // registering the listener.
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            listener.wait();
            if let Some(guard) = self.try_lock() {
                return guard;
            }
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SleepMutexGuard<'_, T>> {
        self.base.try_lock().map(|spin_guard| SleepMutexGuard {
            spin_guard: ManuallyDrop::new(spin_guard),
            mutex: self,
            _not_send: PhantomData,
        })
    }

    /// Whether the calling context holds this lock.
    #[must_use]
    pub fn holding(&self) -> bool {
        self.base.holding()
    }

    /// Out of date the moment it returns.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.base.is_locked()
    }

    /// The context currently holding the lock, if any.
    #[must_use]
    pub fn holder(&self) -> Option<ContextId> {
        self.base.holder()
    }
}

impl<T: fmt::Debug> fmt::Debug for SleepMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f
                .debug_struct("SleepMutex")
                .field("name", &self.name)
                .field("data", &*guard)
                .finish(),
            None => write!(f, "SleepMutex {{ name: {:?}, <locked> }}", self.name),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SleepMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> Deref for SleepMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.spin_guard
    }
}

impl<T> DerefMut for SleepMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.spin_guard
    }
}

impl<T> Drop for SleepMutexGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: dropped exactly once, here, and never touched again.
        unsafe {
            ManuallyDrop::drop(&mut self.spin_guard);
        }
        self.mutex.lock_ops.notify(1);
    }
}

#[cfg(test)]
mod tests {
    use super::SleepMutex;

    #[test]
    fn try_lock() {
        let mutex = SleepMutex::new("test", 42);

        let a = mutex.try_lock();
        assert_eq!(a.as_ref().map(|r| **r), Some(42));

        let b = mutex.try_lock();
        assert!(b.is_none());

        drop(a);
        let c = mutex.try_lock();
        assert_eq!(c.as_ref().map(|r| **r), Some(42));
    }

    #[test]
    fn holding_tracks_the_current_context() {
        let mutex = SleepMutex::new("test", ());
        assert!(!mutex.holding());
        assert_eq!(mutex.holder(), None);

        let g = mutex.lock();
        assert!(mutex.holding());
        assert_eq!(mutex.holder(), Some(crate::current_context()));

        std::thread::scope(|s| {
            s.spawn(|| assert!(!mutex.holding()));
        });

        drop(g);
        assert!(!mutex.holding());
    }
}
