//! One mapped region and the pool slot that holds it.

use alloc::sync::Arc;
use kernel_memory_addresses::VirtualAddress;

use crate::collab::Pid;

bitflags::bitflags! {
    /// Access a mapping allows.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct Prot: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// What happens to stores into the mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Sharing {
    /// Stores stay in the process; the file is never written.
    Private,
    /// Stores are written back to the file when the range is unmapped.
    Shared,
}

/// Snapshot of a live mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Vma {
    pub addr: VirtualAddress,
    pub len: u64,
    pub prot: Prot,
    pub sharing: Sharing,
    /// File offset of `addr`.
    pub offset: u64,
    pub owner: Pid,
}

impl Vma {
    /// One past the last mapped byte.
    #[must_use]
    pub fn end(&self) -> VirtualAddress {
        self.addr + self.len
    }

    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        va >= self.addr && va < self.end()
    }

    #[must_use]
    pub fn writes_back(&self) -> bool {
        self.sharing == Sharing::Shared && self.prot.contains(Prot::WRITE)
    }
}

/// Names a pool slot found by [`Mmap::find_mapping`](crate::Mmap::find_mapping).
///
/// The slot may change after the lookup; every operation taking a handle
/// revalidates it under the slot lock.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct VmaHandle(pub(crate) usize);

impl VmaHandle {
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0
    }
}

/// Pool slot; guarded by its own sleep lock.
pub(crate) struct VmaSlot<F> {
    /// 0 while the slot is free.
    pub(crate) refcnt: u32,
    pub(crate) live: Option<Live<F>>,
}

/// Fields of an in-use slot.
pub(crate) struct Live<F> {
    pub(crate) vma: Vma,
    pub(crate) file: Arc<F>,
}

impl<F> VmaSlot<F> {
    pub(crate) const fn free() -> Self {
        Self {
            refcnt: 0,
            live: None,
        }
    }

    /// The mapping, if it is live and owned by `pid`.
    pub(crate) fn owned_by(&self, pid: Pid) -> Option<&Vma> {
        self.live
            .as_ref()
            .map(|l| &l.vma)
            .filter(|vma| self.refcnt > 0 && vma.owner == pid)
    }

    /// Returns the slot to the pool and drops its file reference.
    pub(crate) fn destroy(&mut self) {
        assert_eq!(self.refcnt, 1, "vma: destroying a slot with {} holders", self.refcnt);
        self.refcnt = 0;
        self.live = None;
    }
}
