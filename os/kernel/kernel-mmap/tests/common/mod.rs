#![allow(dead_code)]

use kernel_alloc::{FrameAllocator, HostPhysMemory, PhysMemory};
use kernel_bio::{BSIZE, BlockCache, RamDisk};
use kernel_info::fs::MAX_WRITE_CHUNK;
use kernel_info::memory::{KERNBASE, MMAP_TOP, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_mmap::{AddressSpace, BackingFile, Fault, FileError, Pid};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub type Frames = FrameAllocator<HostPhysMemory>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn frames(pages: u64) -> Arc<Frames> {
    let base = PhysicalAddress::new(KERNBASE);
    let memory = HostPhysMemory::new(base, pages * PAGE_SIZE);
    Arc::new(FrameAllocator::new(base, base + pages * PAGE_SIZE, memory).unwrap())
}

/// A process page table that backs pages on demand, like the page-fault
/// handler does for file mappings.
pub struct SimAddressSpace {
    pid: Pid,
    top: VirtualAddress,
    frames: Arc<Frames>,
    pages: BTreeMap<VirtualPage, PhysicalPage>,
}

impl SimAddressSpace {
    pub fn new(pid: u32, frames: Arc<Frames>) -> Self {
        Self::with_top(pid, frames, VirtualAddress::new(MMAP_TOP))
    }

    pub fn with_top(pid: u32, frames: Arc<Frames>, top: VirtualAddress) -> Self {
        Self {
            pid: Pid::new(pid),
            top,
            frames,
            pages: BTreeMap::new(),
        }
    }

    /// Backs the page containing `va` with a zeroed frame.
    pub fn fault_in(&mut self, va: VirtualAddress) {
        let page = va.page();
        if !self.pages.contains_key(&page) {
            let frame = self.frames.allocate().unwrap();
            self.frames.memory().fill(frame, 0);
            self.pages.insert(page, frame);
        }
    }

    /// User store; faults pages in as needed.
    pub fn store(&mut self, va: VirtualAddress, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let at = va + done as u64;
            self.fault_in(at);
            let frame = self.pages[&at.page()];
            let room = usize::try_from(PAGE_SIZE - at.page_offset()).unwrap();
            let n = room.min(data.len() - done);
            self.frames
                .memory()
                .write(frame.base() + at.page_offset(), &data[done..done + n]);
            done += n;
        }
    }

    pub fn load(&self, va: VirtualAddress, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.copy_in(va, &mut buf).unwrap();
        buf
    }

    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }
}

impl AddressSpace for SimAddressSpace {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn mmap_top(&self) -> VirtualAddress {
        self.top
    }

    fn set_mmap_top(&mut self, top: VirtualAddress) {
        assert!(top <= self.top, "mapping cursor moved up");
        self.top = top;
    }

    fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.pages.contains_key(&va.page())
    }

    fn copy_in(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), Fault> {
        let mut done = 0;
        while done < buf.len() {
            let at = va + done as u64;
            let frame = self.pages.get(&at.page()).ok_or(Fault { va: at })?;
            let room = usize::try_from(PAGE_SIZE - at.page_offset()).unwrap();
            let n = room.min(buf.len() - done);
            self.frames
                .memory()
                .read(frame.base() + at.page_offset(), &mut buf[done..done + n]);
            done += n;
        }
        Ok(())
    }

    fn unmap_and_release(&mut self, va: VirtualAddress, len: u64) {
        let end = va + len;
        let mut page = va.page();
        while page.base() < end {
            if let Some(frame) = self.pages.remove(&page) {
                self.frames.release(frame.base());
            }
            page = page.next();
        }
    }
}

/// A file occupying `nblocks` consecutive disk blocks, written through the
/// block cache.
pub struct ExtentFile {
    cache: Arc<BlockCache<RamDisk>>,
    dev: u32,
    first: u32,
    nblocks: u32,
    readable: bool,
    writable: bool,
    in_tx: AtomicUsize,
    transactions: AtomicUsize,
    failing: AtomicBool,
}

impl ExtentFile {
    pub fn new(cache: Arc<BlockCache<RamDisk>>, dev: u32, first: u32, nblocks: u32) -> Self {
        Self {
            cache,
            dev,
            first,
            nblocks,
            readable: true,
            writable: true,
            in_tx: AtomicUsize::new(0),
            transactions: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.readable = false;
        self
    }

    pub fn size(&self) -> u64 {
        u64::from(self.nblocks) * BSIZE as u64
    }

    /// Makes every following write fail with an I/O error.
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn transactions(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn read_at(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut at = offset;
        while out.len() < len {
            let (blockno, within) = self.locate(at);
            let b = self.cache.read(self.dev, blockno).unwrap();
            let n = (BSIZE - within).min(len - out.len());
            out.extend_from_slice(&b.data()[within..within + n]);
            at += n as u64;
        }
        out
    }

    fn locate(&self, offset: u64) -> (u32, usize) {
        let bsize = BSIZE as u64;
        let blockno = self.first + u32::try_from(offset / bsize).unwrap();
        (blockno, usize::try_from(offset % bsize).unwrap())
    }
}

impl BackingFile for ExtentFile {
    fn is_readable(&self) -> bool {
        self.readable
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn begin_op(&self) {
        assert_eq!(self.in_tx.fetch_add(1, Ordering::SeqCst), 0, "nested transaction");
        self.transactions.fetch_add(1, Ordering::SeqCst);
    }

    fn end_op(&self) {
        assert_eq!(self.in_tx.fetch_sub(1, Ordering::SeqCst), 1, "end_op without begin_op");
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize, FileError> {
        assert_eq!(self.in_tx.load(Ordering::SeqCst), 1, "write outside a transaction");
        assert!(data.len() <= MAX_WRITE_CHUNK, "write of {} bytes", data.len());
        if !self.writable {
            return Err(FileError::ReadOnly);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FileError::Io);
        }

        let room = usize::try_from(self.size().saturating_sub(offset)).unwrap();
        let len = data.len().min(room);
        let mut done = 0;
        while done < len {
            let (blockno, within) = self.locate(offset + done as u64);
            let mut b = self.cache.read(self.dev, blockno).map_err(|_| FileError::NoSpace)?;
            let n = (BSIZE - within).min(len - done);
            b.data_mut()[within..within + n].copy_from_slice(&data[done..done + n]);
            self.cache.write(&b);
            done += n;
        }
        Ok(len)
    }
}
