use crate::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use core::fmt;

/// Base of one physical frame.
///
/// ### Invariants
/// - The low [`PAGE_SHIFT`] bits of the base are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(PhysicalAddress);

impl PhysicalPage {
    /// The frame containing `pa` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(PhysicalAddress::new(pa.as_u64() & !(PAGE_SIZE - 1)))
    }

    /// The frame starting at `pa`, or `None` if `pa` is not page aligned.
    #[inline]
    #[must_use]
    pub const fn from_aligned(pa: PhysicalAddress) -> Option<Self> {
        if pa.is_page_aligned() {
            Some(Self(pa))
        } else {
            None
        }
    }

    /// The frame with physical frame number `pfn`.
    #[inline]
    #[must_use]
    pub const fn from_number(pfn: u64) -> Self {
        Self(PhysicalAddress::new(pfn << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0
    }

    /// Physical frame number.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0.as_u64() >> PAGE_SHIFT
    }

    /// The frame directly above this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(PhysicalAddress::new(self.0.as_u64() + PAGE_SIZE))
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/4K", self.0)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({:#018X})", self.0.as_u64())
    }
}
