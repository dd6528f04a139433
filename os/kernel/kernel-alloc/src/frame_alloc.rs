//! Reference-counted physical frame allocator.
//!
//! The per-frame counts are little-endian `u32`s stored in the metadata
//! frames at the bottom of the managed range and accessed through
//! [`PhysMemory`]. One allocator-wide spin lock guards them and the free
//! list. It is always taken with interrupts suppressed
//! ([`SpinMutex::lock_irq`](kernel_sync::Mutex::lock_irq)) and held only for
//! O(1) bookkeeping; filling a frame with junk happens outside the lock,
//! while the caller is the frame's only owner.

use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;
use kernel_info::memory::{ALLOC_JUNK, FREE_JUNK};
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, page_round_down, page_round_up, pages_spanning,
};
use kernel_sync::SpinMutex;
use log::{debug, info};

use crate::phys_memory::PhysMemory;

/// Bytes of metadata kept per frame: one `u32` count.
const COUNT_BYTES: u64 = 4;

/// Minimal frame-level allocation interface, for code that only needs
/// single 4 KiB frames (page tables, simulated page faults).
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame, or `None` when memory is exhausted.
    fn alloc_4k(&self) -> Option<PhysicalPage>;

    /// Drop one reference to `page`.
    fn free_4k(&self, page: PhysicalPage);
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("range {start}..{end} cannot hold metadata for {frames} frames plus one usable frame")]
    RangeTooSmall {
        start: PhysicalAddress,
        end: PhysicalAddress,
        frames: u64,
    },
    #[error("cannot track {0} frames on this host")]
    TooManyFrames(u64),
}

struct FrameTable {
    /// Frames with count 0. Last pushed is handed out first.
    free: Vec<PhysicalPage>,
}

pub struct FrameAllocator<M> {
    memory: M,
    /// Start of the count array: one `u32` per allocatable frame, indexed
    /// from `first`.
    counts: PhysicalAddress,
    /// First allocatable frame (directly above the metadata frames).
    first: PhysicalPage,
    frames: usize,
    /// One past the last allocatable byte.
    end: PhysicalAddress,
    table: SpinMutex<FrameTable>,
}

impl<M: PhysMemory> FrameAllocator<M> {
    /// Takes ownership of every frame in `[round_up(kernel_end), phys_top)`.
    ///
    /// The frames at the bottom of the range are set aside for the
    /// reference-count array and zeroed; all others are scrubbed with the
    /// free pattern and put on the free list.
    ///
    /// # Errors
    /// [`FrameAllocError::RangeTooSmall`] if nothing would be left after
    /// the metadata.
    pub fn new(
        kernel_end: PhysicalAddress,
        phys_top: PhysicalAddress,
        memory: M,
    ) -> Result<Self, FrameAllocError> {
        let start = page_round_up(kernel_end.as_u64());
        let top = page_round_down(phys_top.as_u64());
        let frames = top.saturating_sub(start) / PAGE_SIZE;
        let meta = pages_spanning(frames * COUNT_BYTES);
        if frames <= meta {
            return Err(FrameAllocError::RangeTooSmall {
                start: PhysicalAddress::new(start),
                end: PhysicalAddress::new(top),
                frames,
            });
        }

        let usable = frames - meta;
        let slots = usize::try_from(usable).map_err(|_| FrameAllocError::TooManyFrames(usable))?;

        let counts = PhysicalAddress::new(start);
        let mut page = PhysicalPage::containing(counts);
        for _ in 0..meta {
            memory.fill(page, 0);
            page = page.next();
        }
        let first = page;

        let mut free = Vec::with_capacity(slots);
        for _ in 0..usable {
            memory.fill(page, FREE_JUNK);
            free.push(page);
            page = page.next();
        }

        info!(
            "frame allocator: {usable} frames at {}..{top:#x}, {meta} metadata frame(s)",
            first.base()
        );

        Ok(Self {
            memory,
            counts,
            first,
            frames: slots,
            end: PhysicalAddress::new(top),
            table: SpinMutex::new(FrameTable { free }),
        })
    }

    /// Hands out a frame with count 1, filled with the allocation pattern.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if the free list is empty.
    pub fn allocate(&self) -> Result<PhysicalPage, FrameAllocError> {
        let page = {
            let mut table = self.table.lock_irq();
            let page = table.free.pop().ok_or(FrameAllocError::OutOfMemory)?;
            debug_assert_eq!(self.load_count(&table, page), 0, "free frame {page} has owners");
            self.store_count(&mut table, page, 1);
            page
        };
        self.memory.fill(page, ALLOC_JUNK);
        Ok(page)
    }

    /// Drops one reference to the frame at `pa`; the last one returns it to
    /// the free list, scrubbed.
    ///
    /// # Panics
    /// Panics if `pa` is not page aligned, lies outside the managed range, or
    /// names a frame that is already free.
    pub fn release(&self, pa: PhysicalAddress) {
        let page = self.checked_page("release", pa);
        {
            let mut table = self.table.lock_irq();
            let count = self.load_count(&table, page);
            assert!(count > 0, "release: frame {page} is already free");
            self.store_count(&mut table, page, count - 1);
            if count > 1 {
                return;
            }
        }

        // The count is 0 but the frame is not yet reachable from the free
        // list, so nobody else can touch it while it is scrubbed.
        self.memory.fill(page, FREE_JUNK);
        self.table.lock_irq().free.push(page);
    }

    /// Registers another owner of the allocated frame at `pa`.
    ///
    /// # Panics
    /// Panics if `pa` is not page aligned, lies outside the managed range, or
    /// names a free frame.
    pub fn add_reference(&self, pa: PhysicalAddress) -> PhysicalPage {
        let page = self.checked_page("add_reference", pa);
        let mut table = self.table.lock_irq();
        let count = self.load_count(&table, page);
        assert!(count > 0, "add_reference: frame {page} is not allocated");
        self.store_count(&mut table, page, count + 1);
        debug!("frame {page}: {} owners", count + 1);
        page
    }

    /// Current owner count of the frame containing `pa`, or `None` if it is
    /// not managed by this allocator.
    #[must_use]
    pub fn ref_count(&self, pa: PhysicalAddress) -> Option<u32> {
        let page = PhysicalPage::containing(pa);
        self.contains(page)
            .then(|| self.load_count(&self.table.lock_irq(), page))
    }

    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.table.lock_irq().free.len()
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.frames
    }

    /// Addresses of the allocatable frames.
    #[must_use]
    pub const fn managed_range(&self) -> Range<PhysicalAddress> {
        self.first.base()..self.end
    }

    /// The memory this allocator scrubs frames through.
    #[must_use]
    pub const fn memory(&self) -> &M {
        &self.memory
    }

    fn contains(&self, page: PhysicalPage) -> bool {
        page >= self.first && page.base() < self.end
    }

    fn checked_page(&self, op: &str, pa: PhysicalAddress) -> PhysicalPage {
        let page = PhysicalPage::from_aligned(pa)
            .unwrap_or_else(|| panic!("{op}: {pa} is not page aligned"));
        assert!(
            self.contains(page),
            "{op}: {pa} outside {}..{}",
            self.first.base(),
            self.end
        );
        page
    }

    /// Where the count of `page` lives. `page` must be managed.
    fn count_addr(&self, page: PhysicalPage) -> PhysicalAddress {
        self.counts + (page.number() - self.first.number()) * COUNT_BYTES
    }

    /// Reads a count; the table borrow proves the lock is held.
    fn load_count(&self, _table: &FrameTable, page: PhysicalPage) -> u32 {
        let mut raw = [0u8; 4];
        self.memory.read(self.count_addr(page), &mut raw);
        u32::from_le_bytes(raw)
    }

    fn store_count(&self, _table: &mut FrameTable, page: PhysicalPage, count: u32) {
        self.memory
            .write(self.count_addr(page), &count.to_le_bytes());
    }
}

impl<M: PhysMemory> FrameAlloc for FrameAllocator<M> {
    fn alloc_4k(&self) -> Option<PhysicalPage> {
        self.allocate().ok()
    }

    fn free_4k(&self, page: PhysicalPage) {
        self.release(page.base());
    }
}

impl<M> fmt::Debug for FrameAllocator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("first", &self.first)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostPhysMemory;

    const BASE: u64 = 0x8000_0000;

    fn allocator(pages: u64) -> FrameAllocator<HostPhysMemory> {
        let base = PhysicalAddress::new(BASE);
        let memory = HostPhysMemory::new(base, pages * PAGE_SIZE);
        FrameAllocator::new(base, base + pages * PAGE_SIZE, memory).unwrap()
    }

    #[test]
    fn metadata_frames_are_carved_out() {
        let frames = allocator(8);
        assert_eq!(frames.total_frames(), 7);
        assert_eq!(frames.free_frames(), 7);
        assert_eq!(frames.managed_range().start.as_u64(), BASE + PAGE_SIZE);
        assert_eq!(frames.ref_count(PhysicalAddress::new(BASE)), None);
    }

    #[test]
    fn kernel_end_is_rounded_up() {
        let base = PhysicalAddress::new(BASE);
        let memory = HostPhysMemory::new(base, 8 * PAGE_SIZE);
        let frames = FrameAllocator::new(base + 1, base + 8 * PAGE_SIZE, memory).unwrap();
        assert_eq!(frames.total_frames(), 6);
    }

    #[test]
    fn too_small_range_is_rejected() {
        let base = PhysicalAddress::new(BASE);
        let memory = HostPhysMemory::new(base, PAGE_SIZE);
        let err = FrameAllocator::new(base, base + PAGE_SIZE, memory).unwrap_err();
        assert!(matches!(err, FrameAllocError::RangeTooSmall { frames: 1, .. }));
    }

    #[test]
    fn counts_live_in_the_metadata_frame() {
        let frames = allocator(8);
        // frames are pushed in ascending order, so the last one comes first
        let page = frames.allocate().unwrap();
        assert_eq!(page.base().as_u64(), BASE + 7 * PAGE_SIZE);
        frames.add_reference(page.base());

        let mut raw = [0u8; 4];
        frames
            .memory()
            .read(PhysicalAddress::new(BASE + 6 * COUNT_BYTES), &mut raw);
        assert_eq!(u32::from_le_bytes(raw), 2);

        frames.release(page.base());
        frames.release(page.base());
        frames
            .memory()
            .read(PhysicalAddress::new(BASE + 6 * COUNT_BYTES), &mut raw);
        assert_eq!(u32::from_le_bytes(raw), 0);
    }

    #[test]
    fn free_list_is_lifo() {
        let frames = allocator(8);
        let a = frames.allocate().unwrap();
        let b = frames.allocate().unwrap();
        assert_ne!(a, b);
        frames.release(a.base());
        assert_eq!(frames.allocate().unwrap(), a);
    }
}
