use crate::{PAGE_SIZE, VirtualAddress};
use core::fmt;

/// Base of one virtual page.
///
/// ### Invariants
/// - The base is always page aligned.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(VirtualAddress);

impl VirtualPage {
    /// The page containing `va` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(va: VirtualAddress) -> Self {
        Self(VirtualAddress::new(va.as_u64() & !(PAGE_SIZE - 1)))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        self.0
    }

    /// The page directly above this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(VirtualAddress::new(self.0.as_u64() + PAGE_SIZE))
    }

    /// The page directly below this one, or `None` for page zero.
    #[inline]
    #[must_use]
    pub const fn prev(self) -> Option<Self> {
        match self.0.checked_sub(PAGE_SIZE) {
            Some(va) => Some(Self(va)),
            None => None,
        }
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/4K", self.0)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:#018X})", self.0.as_u64())
    }
}
