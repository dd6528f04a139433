//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the raw addresses the memory-management code
//! passes around.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory. |
//! | [`PhysicalPage`] | The page-aligned base of one physical frame. |
//! | [`VirtualAddress`] | A byte address in a process's virtual address space. |
//! | [`VirtualPage`] | The page-aligned base of one virtual page. |
//!
//! All pages are [`PAGE_SIZE`] bytes; the kernel never maps huge pages.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x1234);
//! assert_eq!(va.page().base().as_u64(), 0x1000);
//! assert_eq!(va.page_offset(), 0x234);
//!
//! // A page-aligned physical address converts into a frame.
//! let frame = PhysicalPage::from_aligned(PhysicalAddress::new(0x8000_2000)).unwrap();
//! assert_eq!(frame.next().base().as_u64(), 0x8000_3000);
//!
//! assert_eq!(pages_spanning(1), 1);
//! assert_eq!(pages_spanning(PAGE_SIZE + 1), 2);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` over `u64` and implement `Copy`,
//!   `Eq`, `Ord`, and `Hash`.
//! - Page types can only be built aligned; [`PhysicalPage::from_aligned`]
//!   rejects unaligned input instead of silently rounding.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use kernel_info::memory::{PAGE_LEN, PAGE_SHIFT, PAGE_SIZE};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Round `x` down to a page boundary.
#[inline]
#[must_use]
pub const fn page_round_down(x: u64) -> u64 {
    x & !(PAGE_SIZE - 1)
}

/// Round `x` up to a page boundary.
///
/// `x + PAGE_SIZE - 1` must not overflow.
#[inline]
#[must_use]
pub const fn page_round_up(x: u64) -> u64 {
    (x + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Number of pages needed to hold `len` bytes.
#[inline]
#[must_use]
pub const fn pages_spanning(len: u64) -> u64 {
    len.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0), 0);
        assert_eq!(page_round_down(4095), 0);
        assert_eq!(page_round_down(4096), 4096);
        assert_eq!(page_round_up(1), 4096);
        assert_eq!(page_round_up(4096), 4096);
        assert_eq!(page_round_up(4097), 8192);
    }

    #[test]
    fn spanning() {
        assert_eq!(pages_spanning(0), 0);
        assert_eq!(pages_spanning(1), 1);
        assert_eq!(pages_spanning(PAGE_SIZE), 1);
        assert_eq!(pages_spanning(3 * PAGE_SIZE + 7), 4);
    }

    #[test]
    fn physical_page_alignment() {
        assert!(PhysicalPage::from_aligned(PhysicalAddress::new(0x8000_0001)).is_none());
        let p = PhysicalPage::containing(PhysicalAddress::new(0x8000_1234));
        assert_eq!(p.base().as_u64(), 0x8000_1000);
        assert_eq!(p.number(), 0x8000_1);
        assert_eq!(PhysicalPage::from_number(p.number()), p);
    }

    #[test]
    fn virtual_page_walk() {
        let va = VirtualAddress::new(0x5000);
        let p = va.page();
        assert_eq!(p.next().base().as_u64(), 0x6000);
        assert_eq!(p.prev().map(|q| q.base().as_u64()), Some(0x4000));
        assert_eq!(VirtualPage::containing(VirtualAddress::new(0)).prev(), None);
        assert_eq!(va.checked_sub(0x1000), Some(VirtualAddress::new(0x4000)));
        assert_eq!(VirtualAddress::new(1).checked_sub(2), None);
    }
}
