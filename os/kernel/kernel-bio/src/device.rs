//! The raw block-transfer layer underneath the cache.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::fs::BSIZE;
use kernel_sync::SpinMutex;

/// Synchronous block transfers.
///
/// Both calls block the caller until the transfer has completed and are
/// assumed not to fail.
pub trait BlockDevice {
    /// Fills `buf` with block `blockno` of device `dev`.
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]);

    /// Persists `buf` as block `blockno` of device `dev`.
    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]);
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) {
        (**self).read_block(dev, blockno, buf);
    }

    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) {
        (**self).write_block(dev, blockno, buf);
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for Arc<D> {
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) {
        (**self).read_block(dev, blockno, buf);
    }

    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) {
        (**self).write_block(dev, blockno, buf);
    }
}

/// In-memory disk. Blocks never written read back as zeros.
///
/// Counts transfers so callers can check how often the cache went to disk.
pub struct RamDisk {
    blocks: SpinMutex<BTreeMap<(u32, u32), Box<[u8; BSIZE]>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl RamDisk {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks: SpinMutex::new(BTreeMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Stores `data` as the block's content without counting a transfer.
    pub fn preload(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) {
        self.blocks.lock().insert((dev, blockno), Box::new(*data));
    }

    /// Current on-disk content of a block.
    #[must_use]
    pub fn block(&self, dev: u32, blockno: u32) -> [u8; BSIZE] {
        self.blocks
            .lock()
            .get(&(dev, blockno))
            .map_or([0; BSIZE], |b| **b)
    }

    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE]) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        *buf = self.block(dev, blockno);
    }

    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.blocks.lock().insert((dev, blockno), Box::new(*buf));
    }
}
