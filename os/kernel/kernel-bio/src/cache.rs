//! The buffer pool, its hash buckets and CLOCK eviction.
//!
//! Lock order: the eviction lock comes before any bucket lock, and at most
//! one bucket lock is held at a time. A buffer's sleep lock is only ever
//! acquired with no spin lock held, except for the `try_lock` on a freshly
//! evicted victim, which cannot fail.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::fs::{NBUCKET, NBUF};
use kernel_sync::SpinMutex;
use log::{error, trace};

use crate::bucket::{Bucket, Links};
use crate::buf::{Buf, BufGuard, BufRef, NO_DEVICE, PinnedBuf};
use crate::device::BlockDevice;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BioConfig {
    /// Buffers in the pool.
    pub nbuf: usize,
    /// Hash buckets over the block number.
    pub nbucket: usize,
}

impl Default for BioConfig {
    fn default() -> Self {
        Self {
            nbuf: NBUF,
            nbucket: NBUCKET,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BioError {
    #[error("no buffers: all {nbuf} buffers are in use")]
    NoBuffers { nbuf: usize },
}

/// Lookup counters since the cache was created.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct CacheStats {
    /// Lookups served by a buffer already holding the block.
    pub hits: u64,
    /// Lookups that recycled a buffer.
    pub misses: u64,
    /// Lookups that found every buffer in use.
    pub exhausted: u64,
}

/// One row of a [`BlockCache::dump`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BufState {
    pub bucket: usize,
    pub dev: u32,
    pub blockno: u32,
    pub refcnt: u32,
    pub recent: bool,
}

impl fmt::Display for BufState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bucket {}: no: {}, ref: {}, clk: {}",
            self.bucket,
            self.blockno,
            self.refcnt,
            u8::from(self.recent)
        )
    }
}

pub struct BlockCache<D> {
    device: D,
    bufs: Box<[Buf]>,
    links: Links,
    buckets: Box<[SpinMutex<Bucket>]>,
    /// Serializes misses. Guards the clock hand into `bufs`.
    evict: SpinMutex<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    exhausted: AtomicU64,
}

impl<D: BlockDevice> BlockCache<D> {
    /// Builds a pool of unassigned buffers, all linked into bucket 0.
    ///
    /// # Panics
    /// Panics if `config` asks for no buffers or no buckets.
    pub fn new(device: D, config: BioConfig) -> Self {
        let BioConfig { nbuf, nbucket } = config;
        assert!(nbuf > 0, "binit: empty buffer pool");
        assert!(nbucket > 0, "binit: no buckets");

        let links = Links::new(nbuf + nbucket);
        let mut buckets: Box<[SpinMutex<Bucket>]> = (0..nbucket)
            .map(|b| SpinMutex::new(Bucket::new(nbuf + b)))
            .collect();
        let bufs: Box<[Buf]> = (0..nbuf).map(|_| Buf::new()).collect();

        let home = bucket_index(0, nbucket);
        for i in 0..nbuf {
            buckets[home].get_mut().push_front(&links, i);
        }

        Self {
            device,
            bufs,
            links,
            buckets,
            evict: SpinMutex::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    /// Returns the buffer for `(dev, blockno)` with its exclusive lock
    /// held, recycling an idle buffer if the block is not cached.
    ///
    /// The payload is only meaningful if [`BufGuard::is_valid`]; use
    /// [`read`](Self::read) to have it filled from disk.
    ///
    /// # Errors
    /// [`BioError::NoBuffers`] if the block is not cached and every buffer
    /// is referenced.
    ///
    /// # Panics
    /// Panics if `dev` is the reserved [`NO_DEVICE`] id.
    pub fn get(&self, dev: u32, blockno: u32) -> Result<BufGuard<'_, D>, BioError> {
        assert_ne!(dev, NO_DEVICE, "bget: device id {dev} is reserved");
        let home = self.bucket_of(blockno);

        if let Some(i) = self.lookup(home, dev, blockno) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(BufGuard::new(self, i, self.bufs[i].lock.lock()));
        }

        let mut hand = self.evict.lock_irq();

        // Every insertion happens under the eviction lock, so a concurrent
        // miss for the same block is visible now.
        if let Some(i) = self.lookup(home, dev, blockno) {
            drop(hand);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(BufGuard::new(self, i, self.bufs[i].lock.lock()));
        }

        let Some(victim) = self.evict_one(&mut hand) else {
            drop(hand);
            self.exhausted.fetch_add(1, Ordering::Relaxed);
            error!("bget: no buffers for {dev}/{blockno}");
            for row in self.dump() {
                error!("  {row}");
            }
            return Err(BioError::NoBuffers {
                nbuf: self.bufs.len(),
            });
        };

        let buf = &self.bufs[victim];
        // Nobody holds or waits for an unreferenced, unlinked buffer.
        let Some(mut data) = buf.lock.try_lock() else {
            panic!("bget: evicted buffer {victim} is locked");
        };
        data.valid = false;
        buf.retag(dev, blockno);
        self.buckets[home]
            .lock_irq()
            .push_front(&self.links, victim);
        drop(hand);

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!("bget: {dev}/{blockno} -> buf {victim}");
        Ok(BufGuard::new(self, victim, data))
    }

    /// Returns the locked buffer for `(dev, blockno)` holding the block's
    /// disk content. Reads from the device only if the buffer is not valid.
    ///
    /// # Errors
    /// As [`get`](Self::get).
    pub fn read(&self, dev: u32, blockno: u32) -> Result<BufGuard<'_, D>, BioError> {
        let mut b = self.get(dev, blockno)?;
        if !b.inner.valid {
            self.device.read_block(dev, blockno, &mut b.inner.data);
            b.inner.valid = true;
        }
        Ok(b)
    }

    /// Writes the buffer's payload to disk.
    ///
    /// # Panics
    /// Panics if the guard belongs to another cache or (in debug builds) if
    /// the calling context does not hold the buffer.
    pub fn write(&self, b: &BufGuard<'_, D>) {
        assert!(ptr::eq(b.held.cache, self), "bwrite: buffer of another cache");
        let buf = &self.bufs[b.held.index];
        debug_assert!(buf.lock.holding(), "bwrite: buffer not held");
        self.device
            .write_block(buf.dev(), buf.blockno(), &b.inner.data);
    }

    /// Releases the exclusive lock, then the reference. Same as dropping
    /// the guard.
    pub fn release(&self, b: BufGuard<'_, D>) {
        assert!(ptr::eq(b.held.cache, self), "brelse: buffer of another cache");
        drop(b);
    }

    /// Takes an extra reference that keeps the buffer from being recycled
    /// after `b` is released.
    pub fn pin<'a>(&'a self, b: &BufGuard<'a, D>) -> PinnedBuf<'a, D> {
        assert!(ptr::eq(b.held.cache, self), "bpin: buffer of another cache");
        let buf = &self.bufs[b.held.index];
        let _bucket = self.buckets[self.bucket_of(buf.blockno())].lock_irq();
        buf.pin();
        PinnedBuf {
            held: BufRef::new(self, b.held.index, "bunpin"),
        }
    }

    /// Gives up a reference taken by [`pin`](Self::pin).
    pub fn unpin(&self, p: PinnedBuf<'_, D>) {
        assert!(ptr::eq(p.held.cache, self), "bunpin: buffer of another cache");
        drop(p);
    }

    /// Holder count of the cached copy of `(dev, blockno)`, if any.
    #[must_use]
    pub fn ref_count(&self, dev: u32, blockno: u32) -> Option<u32> {
        let bucket = self.buckets[self.bucket_of(blockno)].lock_irq();
        bucket
            .iter(&self.links)
            .find(|&i| self.bufs[i].holds(dev, blockno))
            .map(|i| self.bufs[i].refcnt())
    }

    /// Number of buffers currently tagged `(dev, blockno)`.
    #[must_use]
    pub fn copies(&self, dev: u32, blockno: u32) -> usize {
        let bucket = self.buckets[self.bucket_of(blockno)].lock_irq();
        bucket
            .iter(&self.links)
            .filter(|&i| self.bufs[i].holds(dev, blockno))
            .count()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }

    /// State of every buffer, bucket by bucket. Each bucket is locked on
    /// its own, so the whole is not an atomic snapshot.
    #[must_use]
    pub fn dump(&self) -> Vec<BufState> {
        let mut rows = Vec::with_capacity(self.bufs.len());
        for (n, bucket) in self.buckets.iter().enumerate() {
            let bucket = bucket.lock_irq();
            rows.extend(bucket.iter(&self.links).map(|i| {
                let buf = &self.bufs[i];
                BufState {
                    bucket: n,
                    dev: buf.dev(),
                    blockno: buf.blockno(),
                    refcnt: buf.refcnt(),
                    recent: buf.is_recent(),
                }
            }));
        }
        rows
    }

    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    #[must_use]
    pub fn config(&self) -> BioConfig {
        BioConfig {
            nbuf: self.bufs.len(),
            nbucket: self.buckets.len(),
        }
    }

    /// Takes a reference on the cached copy of `(dev, blockno)`.
    fn lookup(&self, home: usize, dev: u32, blockno: u32) -> Option<usize> {
        let bucket = self.buckets[home].lock_irq();
        let i = bucket
            .iter(&self.links)
            .find(|&i| self.bufs[i].holds(dev, blockno))?;
        self.bufs[i].acquire_ref();
        Some(i)
    }

    /// CLOCK scan over up to two rounds of the pool, starting at the hand.
    ///
    /// Idle buffers with the clock bit set lose it and survive this pass;
    /// the first idle buffer without it is unlinked and returned, and the
    /// hand moves past it.
    fn evict_one(&self, hand: &mut usize) -> Option<usize> {
        debug_assert!(self.evict.holding(), "bget: eviction lock not held");
        let n = self.bufs.len();
        for step in 0..2 * n {
            let i = (*hand + step) % n;
            let buf = &self.bufs[i];
            // The block number only changes under the eviction lock we hold.
            let mut bucket = self.buckets[self.bucket_of(buf.blockno())].lock_irq();
            if buf.refcnt() != 0 {
                continue;
            }
            if buf.is_recent() {
                buf.set_recent(false);
                continue;
            }
            bucket.remove(&self.links, i);
            *hand = (i + 1) % n;
            return Some(i);
        }
        None
    }
}

impl<D> BlockCache<D> {
    pub(crate) fn buf(&self, index: usize) -> &Buf {
        &self.bufs[index]
    }

    /// Drops one reference under the buffer's bucket lock.
    pub(crate) fn unref(&self, index: usize, op: &str) {
        let buf = &self.bufs[index];
        let _bucket = self.buckets[self.bucket_of(buf.blockno())].lock_irq();
        buf.drop_ref(op);
    }

    fn bucket_of(&self, blockno: u32) -> usize {
        bucket_index(blockno, self.buckets.len())
    }
}

impl<D> fmt::Debug for BlockCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("nbuf", &self.bufs.len())
            .field("nbucket", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

fn bucket_index(blockno: u32, nbucket: usize) -> usize {
    // u32 always fits usize on the targets this kernel supports
    usize::try_from(blockno).map_or(0, |b| b % nbucket)
}
