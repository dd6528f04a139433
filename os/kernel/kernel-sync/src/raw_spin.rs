use crate::context::{ContextId, current_context};
use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const NO_OWNER: u64 = 0;

/// Test-and-set lock that remembers which context holds it.
///
/// Acquiring a lock the calling context already holds would spin forever;
/// [`lock`](Self::lock) panics instead.
pub struct RawSpin {
    held: AtomicBool,
    /// Written only by the holder, right after acquiring and right before
    /// releasing.
    owner: AtomicU64,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    /// # Panics
    /// Panics if the calling context already holds the lock.
    #[inline]
    pub fn lock(&self) {
        let me = current_context().as_u64();
        assert!(
            !(self.is_locked() && self.owner.load(Ordering::Relaxed) == me),
            "acquire: lock already held by ctx#{me}"
        );
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        self.owner.store(me, Ordering::Relaxed);
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        let acquired = !self.held.swap(true, Ordering::Acquire);
        if acquired {
            self.owner
                .store(current_context().as_u64(), Ordering::Relaxed);
        }
        acquired
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Whether the calling context holds the lock.
    #[must_use]
    pub fn holding(&self) -> bool {
        self.holder() == Some(current_context())
    }

    /// The context holding the lock, if any. Racy unless asked by the
    /// holder itself.
    #[must_use]
    pub fn holder(&self) -> Option<ContextId> {
        let id = self.owner.load(Ordering::Relaxed);
        (id != NO_OWNER && self.is_locked()).then_some(ContextId::from_raw(id))
    }

    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.held.store(false, Ordering::Release);
    }
}

impl RawLock for RawSpin {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }

    fn raw_is_locked(&self) -> bool {
        self.is_locked()
    }
}

impl RawUnlock for RawSpin {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
