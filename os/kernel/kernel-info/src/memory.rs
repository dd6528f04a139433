//! # Memory Layout

/// Size of a physical frame and of a virtual page, in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// [`PAGE_SIZE`] as a buffer length.
pub const PAGE_LEN: usize = 1 << PAGE_SHIFT;

/// Physical address the kernel image is loaded at.
pub const KERNBASE: u64 = 0x8000_0000;

/// Top of the physical memory managed by the frame allocator (exclusive).
pub const PHYSTOP: u64 = KERNBASE + 128 * 1024 * 1024;

/// Byte written over a frame when it is handed out.
///
/// Code that reads a fresh frame before initializing it sees this pattern
/// instead of stale data.
pub const ALLOC_JUNK: u8 = 5;

/// Byte written over a frame when its last reference is dropped.
///
/// Dangling references into a freed frame read this pattern.
pub const FREE_JUNK: u8 = 1;

/// Highest user virtual address (exclusive), Sv39 style.
pub const MAXVA: u64 = 1 << (9 + 9 + 9 + 12 - 1);

/// Initial top of the per-process file-mapping area.
///
/// Mappings are packed downward from here; the two pages below `MAXVA` are
/// left for the trampoline and the trap frame.
pub const MMAP_TOP: u64 = MAXVA - 2 * PAGE_SIZE;

const _: () = {
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(PAGE_LEN as u64 == PAGE_SIZE);
    assert!(PHYSTOP > KERNBASE);
    assert!(PHYSTOP.is_multiple_of(PAGE_SIZE));
    assert!(MMAP_TOP.is_multiple_of(PAGE_SIZE));
    assert!(ALLOC_JUNK != FREE_JUNK);
};
