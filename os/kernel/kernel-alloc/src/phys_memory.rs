//! # Access to frame contents
//!
//! The allocator never dereferences physical addresses itself. It goes
//! through [`PhysMemory`], which a kernel implements on top of its direct
//! map and tests implement with [`HostPhysMemory`].
//!
//! All methods take `&self`: callers guarantee that nobody else writes the
//! same bytes concurrently (a frame being allocated or scrubbed has a single
//! owner).

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
use kernel_memory_addresses::{PAGE_LEN, PhysicalAddress, PhysicalPage};

pub trait PhysMemory {
    /// Sets every byte of `page` to `byte`.
    fn fill(&self, page: PhysicalPage, byte: u8);

    /// Copies `buf.len()` bytes starting at `pa` into `buf`.
    fn read(&self, pa: PhysicalAddress, buf: &mut [u8]);

    /// Copies `data` to physical memory starting at `pa`.
    fn write(&self, pa: PhysicalAddress, data: &[u8]);
}

impl<M: PhysMemory + ?Sized> PhysMemory for &M {
    fn fill(&self, page: PhysicalPage, byte: u8) {
        (**self).fill(page, byte);
    }

    fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        (**self).read(pa, buf);
    }

    fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        (**self).write(pa, data);
    }
}

/// Heap-backed stand-in for the physical range `[base, base + len)`.
///
/// Bytes are atomics so the arena can be shared between threads without
/// locking; accesses use relaxed ordering, the allocator's lock provides the
/// happens-before edges between owners.
pub struct HostPhysMemory {
    base: PhysicalAddress,
    bytes: Box<[AtomicU8]>,
}

impl HostPhysMemory {
    /// # Panics
    /// Panics if `len` does not fit the host address space.
    #[must_use]
    pub fn new(base: PhysicalAddress, len: u64) -> Self {
        let len = usize::try_from(len)
            .unwrap_or_else(|_| panic!("HostPhysMemory: {len} bytes exceed the host"));
        let bytes = (0..len).map(|_| AtomicU8::new(0)).collect();
        Self { base, bytes }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// One past the last backed byte.
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        self.base + self.len()
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn span(&self, pa: PhysicalAddress, len: usize) -> &[AtomicU8] {
        let start = pa
            .as_u64()
            .checked_sub(self.base.as_u64())
            .and_then(|off| usize::try_from(off).ok());
        start
            .and_then(|s| self.bytes.get(s..s.checked_add(len)?))
            .unwrap_or_else(|| panic!("phys memory: {pa}+{len:#x} outside {}..{}", self.base, self.end()))
    }
}

impl PhysMemory for HostPhysMemory {
    fn fill(&self, page: PhysicalPage, byte: u8) {
        for b in self.span(page.base(), PAGE_LEN) {
            b.store(byte, Ordering::Relaxed);
        }
    }

    fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        let span = self.span(pa, buf.len());
        for (dst, src) in buf.iter_mut().zip(span) {
            *dst = src.load(Ordering::Relaxed);
        }
    }

    fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        for (dst, src) in self.span(pa, data.len()).iter().zip(data) {
            dst.store(*src, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for HostPhysMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPhysMemory")
            .field("base", &self.base)
            .field("end", &self.end())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PAGE_SIZE;

    #[test]
    fn write_then_read_back() {
        let mem = HostPhysMemory::new(PhysicalAddress::new(0x1000), 2 * PAGE_SIZE);
        mem.write(PhysicalAddress::new(0x1ffe), &[1, 2, 3, 4]);
        let mut out = [0u8; 4];
        mem.read(PhysicalAddress::new(0x1ffe), &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn fill_covers_exactly_one_page() {
        let mem = HostPhysMemory::new(PhysicalAddress::new(0), 2 * PAGE_SIZE);
        mem.fill(PhysicalPage::from_number(1), 0xAB);
        let mut edge = [0u8; 2];
        mem.read(PhysicalAddress::new(PAGE_SIZE - 1), &mut edge);
        assert_eq!(edge, [0, 0xAB]);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn out_of_range_access_panics() {
        let mem = HostPhysMemory::new(PhysicalAddress::new(0x1000), PAGE_SIZE);
        mem.write(PhysicalAddress::new(0x1ffe), &[1, 2, 3]);
    }
}
