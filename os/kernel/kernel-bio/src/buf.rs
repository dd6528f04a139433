//! Cached buffers and the handles callers hold on them.

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use kernel_info::fs::BSIZE;
use kernel_sync::{SleepMutex, SleepMutexGuard};

use crate::cache::BlockCache;

/// Device id of a buffer that has never held a block.
pub const NO_DEVICE: u32 = u32::MAX;

/// Payload of a buffer; only reachable through its sleep lock.
pub(crate) struct BufData {
    pub(crate) data: Box<[u8; BSIZE]>,
    /// `data` reflects the disk.
    pub(crate) valid: bool,
}

/// One slot of the buffer pool.
///
/// `dev`, `blockno`, `refcnt` and `recent` change only under the lock of
/// the bucket the buffer is linked into; they are atomics so they can live
/// outside any one bucket.
pub(crate) struct Buf {
    dev: AtomicU32,
    blockno: AtomicU32,
    refcnt: AtomicU32,
    /// Clock bit: set on every access, cleared by an eviction pass.
    recent: AtomicBool,
    pub(crate) lock: SleepMutex<BufData>,
}

impl Buf {
    pub(crate) fn new() -> Self {
        Self {
            dev: AtomicU32::new(NO_DEVICE),
            blockno: AtomicU32::new(0),
            refcnt: AtomicU32::new(0),
            recent: AtomicBool::new(false),
            lock: SleepMutex::new(
                "buffer",
                BufData {
                    data: Box::new([0; BSIZE]),
                    valid: false,
                },
            ),
        }
    }

    pub(crate) fn dev(&self) -> u32 {
        self.dev.load(Ordering::Relaxed)
    }

    pub(crate) fn blockno(&self) -> u32 {
        self.blockno.load(Ordering::Relaxed)
    }

    pub(crate) fn holds(&self, dev: u32, blockno: u32) -> bool {
        self.dev() == dev && self.blockno() == blockno
    }

    pub(crate) fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Relaxed)
    }

    pub(crate) fn is_recent(&self) -> bool {
        self.recent.load(Ordering::Relaxed)
    }

    pub(crate) fn set_recent(&self, recent: bool) {
        self.recent.store(recent, Ordering::Relaxed);
    }

    /// Another holder; marks the buffer recently used.
    pub(crate) fn acquire_ref(&self) {
        self.refcnt.fetch_add(1, Ordering::Relaxed);
        self.set_recent(true);
    }

    pub(crate) fn pin(&self) {
        self.refcnt.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn drop_ref(&self, op: &str) {
        let prev = self.refcnt.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "{op}: buffer {}/{} has no holders", self.dev(), self.blockno());
    }

    /// Gives the buffer a new identity with one holder.
    pub(crate) fn retag(&self, dev: u32, blockno: u32) {
        self.dev.store(dev, Ordering::Relaxed);
        self.blockno.store(blockno, Ordering::Relaxed);
        self.refcnt.store(1, Ordering::Relaxed);
        self.set_recent(true);
    }
}

/// One counted reference on a buffer. Dropping it gives the reference back
/// under the buffer's bucket lock.
pub(crate) struct BufRef<'a, D> {
    pub(crate) cache: &'a BlockCache<D>,
    pub(crate) index: usize,
    op: &'static str,
}

impl<'a, D> BufRef<'a, D> {
    pub(crate) const fn new(cache: &'a BlockCache<D>, index: usize, op: &'static str) -> Self {
        Self { cache, index, op }
    }

    fn buf(&self) -> &'a Buf {
        self.cache.buf(self.index)
    }
}

impl<D> Drop for BufRef<'_, D> {
    fn drop(&mut self) {
        self.cache.unref(self.index, self.op);
    }
}

/// A buffer whose exclusive lock is held by the caller.
///
/// Dropping the guard (or passing it to [`BlockCache::release`]) releases
/// the lock, then gives up the reference.
pub struct BufGuard<'a, D> {
    // Fields drop in order: the lock goes before the reference.
    pub(crate) inner: SleepMutexGuard<'a, BufData>,
    pub(crate) held: BufRef<'a, D>,
}

impl<'a, D> BufGuard<'a, D> {
    pub(crate) const fn new(
        cache: &'a BlockCache<D>,
        index: usize,
        inner: SleepMutexGuard<'a, BufData>,
    ) -> Self {
        Self {
            inner,
            held: BufRef::new(cache, index, "brelse"),
        }
    }

    #[must_use]
    pub fn dev(&self) -> u32 {
        self.held.buf().dev()
    }

    #[must_use]
    pub fn blockno(&self) -> u32 {
        self.held.buf().blockno()
    }

    /// Whether the payload holds the block's disk content.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.valid
    }

    #[must_use]
    pub fn data(&self) -> &[u8; BSIZE] {
        &self.inner.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        &mut self.inner.data
    }
}

impl<D> fmt::Debug for BufGuard<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufGuard")
            .field("dev", &self.dev())
            .field("blockno", &self.blockno())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

/// An extra reference that keeps a buffer resident without locking it.
///
/// Dropping it, or passing it to [`BlockCache::unpin`], gives the reference
/// up again.
#[must_use = "dropping a pin unpins the buffer immediately"]
pub struct PinnedBuf<'a, D> {
    pub(crate) held: BufRef<'a, D>,
}

impl<D> PinnedBuf<'_, D> {
    #[must_use]
    pub fn dev(&self) -> u32 {
        self.held.buf().dev()
    }

    #[must_use]
    pub fn blockno(&self) -> u32 {
        self.held.buf().blockno()
    }
}

impl<D> fmt::Debug for PinnedBuf<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBuf")
            .field("dev", &self.dev())
            .field("blockno", &self.blockno())
            .finish_non_exhaustive()
    }
}
