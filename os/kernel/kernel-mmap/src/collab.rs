//! What the region mapper needs from the rest of the kernel.

use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// Process identity.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u32);

impl Pid {
    #[inline]
    #[must_use]
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

/// A user page that could not be read.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("no mapping at {va}")]
pub struct Fault {
    pub va: VirtualAddress,
}

/// The calling process's page table and mapping cursor.
pub trait AddressSpace {
    fn pid(&self) -> Pid;

    /// Lowest address handed to a file mapping so far; new mappings go
    /// directly below it.
    fn mmap_top(&self) -> VirtualAddress;

    fn set_mmap_top(&mut self, top: VirtualAddress);

    /// Whether the page containing `va` is backed by a frame.
    fn is_mapped(&self, va: VirtualAddress) -> bool;

    /// Copies user memory starting at `va` into `buf`.
    ///
    /// # Errors
    /// [`Fault`] if any byte is not mapped.
    fn copy_in(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), Fault>;

    /// Removes the page-table entries of every backed page in
    /// `[va, va + len)` and releases their frames. Unbacked pages in the
    /// range are skipped.
    fn unmap_and_release(&mut self, va: VirtualAddress, len: u64);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FileError {
    #[error("i/o error")]
    Io,
    #[error("no space left on device")]
    NoSpace,
    #[error("file not open for writing")]
    ReadOnly,
}

/// An open file that can back a mapping.
pub trait BackingFile {
    fn is_readable(&self) -> bool;

    fn is_writable(&self) -> bool;

    /// Opens a file-system transaction.
    fn begin_op(&self);

    /// Closes the transaction opened by the matching [`begin_op`](Self::begin_op).
    fn end_op(&self);

    /// Writes `data` at byte `offset`. Must be called inside a transaction
    /// and with at most [`MAX_WRITE_CHUNK`](kernel_info::fs::MAX_WRITE_CHUNK)
    /// bytes.
    ///
    /// # Errors
    /// Any [`FileError`]; a short count is not an error here.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize, FileError>;
}

/// `begin_op`/`end_op` bracket.
pub(crate) struct Transaction<'a, F: BackingFile + ?Sized>(&'a F);

impl<'a, F: BackingFile + ?Sized> Transaction<'a, F> {
    pub(crate) fn begin(file: &'a F) -> Self {
        file.begin_op();
        Self(file)
    }
}

impl<F: BackingFile + ?Sized> Drop for Transaction<'_, F> {
    fn drop(&mut self) {
        self.0.end_op();
    }
}
