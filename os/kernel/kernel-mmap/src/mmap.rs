use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Deref, DerefMut};
use kernel_info::fs::{MAX_WRITE_CHUNK, NVMA};
use kernel_memory_addresses::{
    PAGE_SIZE, VirtualAddress, page_round_down, page_round_up, pages_spanning,
};
use kernel_sync::{SleepMutex, SleepMutexGuard};
use log::{debug, trace, warn};

use crate::collab::{AddressSpace, BackingFile, Fault, FileError, Pid, Transaction};
use crate::vma::{Live, Prot, Sharing, Vma, VmaHandle, VmaSlot};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MmapConfig {
    /// Slots in the system-wide pool.
    pub nvma: usize,
}

impl Default for MmapConfig {
    fn default() -> Self {
        Self { nvma: NVMA }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MmapError {
    #[error("zero-length mapping")]
    ZeroLength,
    #[error("file not opened for {0:?} access")]
    PermissionDenied(Prot),
    #[error("no free vma slot")]
    NoFreeSlot,
    #[error("no room below {top} for {len} bytes")]
    AddressSpaceExhausted { top: VirtualAddress, len: u64 },
    #[error("{addr} is not in a mapping of the calling process")]
    NotMapped { addr: VirtualAddress },
    #[error("unmapping {addr} + {len:#x} would split the mapping")]
    UnsupportedRange { addr: VirtualAddress, len: u64 },
}

/// Why write-back stopped early.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum WritebackError {
    #[error("cannot read mapped memory: {0}")]
    Fault(#[from] Fault),
    #[error("write at file offset {offset} failed: {source}")]
    Io { offset: u64, source: FileError },
    #[error("short write at file offset {offset}: {written} of {expected} bytes")]
    Short {
        offset: u64,
        written: usize,
        expected: usize,
    },
}

/// A mapping request, as passed to `mmap`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MapRequest {
    /// Advisory only; placement ignores it.
    pub hint: Option<VirtualAddress>,
    pub len: u64,
    pub prot: Prot,
    pub sharing: Sharing,
    /// File offset of the first mapped byte.
    pub offset: u64,
}

/// Outcome of an unmap request.
///
/// A failed write-back does not fail the request: the pages are unmapped
/// regardless and the failure is reported in `writeback`.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Unmapped {
    /// The request covered the rest of the mapping, which is gone now.
    pub destroyed: bool,
    /// Bytes from the start of the range that had backing pages.
    pub released: u64,
    /// Bytes written to the file.
    pub written_back: u64,
    pub writeback: Option<WritebackError>,
}

/// System-wide pool of file mappings.
pub struct Mmap<F> {
    slots: Box<[SleepMutex<VmaSlot<F>>]>,
}

impl<F: BackingFile> Mmap<F> {
    /// # Panics
    /// Panics if `config` asks for an empty pool.
    pub fn new(config: MmapConfig) -> Self {
        assert!(config.nvma > 0, "mmapinit: empty vma pool");
        Self {
            slots: (0..config.nvma)
                .map(|_| SleepMutex::new("vma", VmaSlot::free()))
                .collect(),
        }
    }

    /// Maps `req.len` bytes of `file` directly below the process's lowest
    /// mapping and returns the chosen address.
    ///
    /// # Errors
    /// [`MmapError::NoFreeSlot`] if the pool is full. [`MmapError::ZeroLength`]
    /// and [`MmapError::PermissionDenied`] for requests the file does not
    /// allow. [`MmapError::AddressSpaceExhausted`] if the mapping does not
    /// fit below the cursor. No slot is consumed on error.
    pub fn create_mapping<S: AddressSpace + ?Sized>(
        &self,
        space: &mut S,
        file: &Arc<F>,
        req: MapRequest,
    ) -> Result<VirtualAddress, MmapError> {
        let mut slot = self.reserve().ok_or(MmapError::NoFreeSlot)?;

        if req.len == 0 {
            return Err(MmapError::ZeroLength);
        }
        if req.sharing == Sharing::Shared && req.prot.contains(Prot::WRITE) && !file.is_writable() {
            return Err(MmapError::PermissionDenied(Prot::WRITE));
        }

        let top = space.mmap_top();
        let addr = pages_spanning(req.len)
            .checked_mul(PAGE_SIZE)
            .and_then(|size| top.checked_sub(size))
            .ok_or(MmapError::AddressSpaceExhausted { top, len: req.len })?;
        space.set_mmap_top(addr);

        let owner = space.pid();
        slot.live = Some(Live {
            vma: Vma {
                addr,
                len: req.len,
                prot: req.prot,
                sharing: req.sharing,
                offset: req.offset,
                owner,
            },
            file: Arc::clone(file),
        });
        slot.commit();

        if let Some(hint) = req.hint {
            trace!("mmap: {owner}: hint {hint} ignored");
        }
        debug!("mmap: {owner}: {addr} + {:#x}", req.len);
        Ok(addr)
    }

    /// `mmap(addr, length, prot, flags, fd, offset)`.
    ///
    /// # Errors
    /// As [`create_mapping`](Self::create_mapping).
    #[allow(clippy::too_many_arguments)]
    pub fn mmap<S: AddressSpace + ?Sized>(
        &self,
        space: &mut S,
        hint: Option<VirtualAddress>,
        len: u64,
        prot: Prot,
        sharing: Sharing,
        file: &Arc<F>,
        offset: u64,
    ) -> Result<VirtualAddress, MmapError> {
        let req = MapRequest {
            hint,
            len,
            prot,
            sharing,
            offset,
        };
        self.create_mapping(space, file, req)
    }

    /// The mapping of `pid` that contains `addr`.
    #[must_use]
    pub fn find_mapping(&self, pid: Pid, addr: VirtualAddress) -> Option<VmaHandle> {
        self.slots
            .iter()
            .position(|slot| {
                slot.lock()
                    .owned_by(pid)
                    .is_some_and(|vma| vma.contains(addr))
            })
            .map(VmaHandle)
    }

    /// Removes `[addr, addr + len)` from the mapping behind `handle`.
    ///
    /// `len` is clamped to the end of the mapping. Pages that were never
    /// faulted in are skipped. Shared writable mappings are written back to
    /// the file first. If the range reaches the end of the mapping, the
    /// mapping is destroyed; otherwise it must start at the mapping's start
    /// and the mapping loses that prefix, rounded up to whole pages.
    ///
    /// # Errors
    /// [`MmapError::NotMapped`] if the slot is no longer a mapping of the
    /// calling process or `addr` lies below it.
    /// [`MmapError::UnsupportedRange`] if the range would leave pieces on
    /// both sides.
    pub fn unmap<S: AddressSpace + ?Sized>(
        &self,
        handle: VmaHandle,
        space: &mut S,
        addr: VirtualAddress,
        len: u64,
    ) -> Result<Unmapped, MmapError> {
        let slot = self
            .slots
            .get(handle.0)
            .ok_or(MmapError::NotMapped { addr })?;
        let mut slot = slot.lock();
        unmap_locked(&mut slot, space, addr, len)
    }

    /// `munmap(addr, length)`: [`find_mapping`](Self::find_mapping), then
    /// [`unmap`](Self::unmap). A range starting past the end of the mapping
    /// (after a concurrent trim) is a no-op.
    ///
    /// # Errors
    /// [`MmapError::NotMapped`] if no mapping of the process contains
    /// `addr`, plus the errors of [`unmap`](Self::unmap).
    pub fn munmap<S: AddressSpace + ?Sized>(
        &self,
        space: &mut S,
        addr: VirtualAddress,
        len: u64,
    ) -> Result<Unmapped, MmapError> {
        let handle = self
            .find_mapping(space.pid(), addr)
            .ok_or(MmapError::NotMapped { addr })?;
        self.unmap(handle, space, addr, len)
    }

    /// Unmaps every mapping the process still has, writing shared ones
    /// back. Used on process exit.
    pub fn release_process<S: AddressSpace + ?Sized>(&self, space: &mut S) -> Vec<Unmapped> {
        let pid = space.pid();
        let mut done = Vec::new();
        for slot in &self.slots {
            let mut slot = slot.lock();
            let Some(vma) = slot.owned_by(pid).copied() else {
                continue;
            };
            match unmap_locked(&mut slot, space, vma.addr, vma.len) {
                Ok(unmapped) => {
                    if let Some(err) = &unmapped.writeback {
                        warn!("exit: {pid}: write-back of {} lost: {err}", vma.addr);
                    }
                    done.push(unmapped);
                }
                Err(err) => warn!("exit: {pid}: cannot unmap {}: {err}", vma.addr),
            }
        }
        done
    }

    /// Current state of the mapping behind `handle`.
    #[must_use]
    pub fn vma(&self, handle: VmaHandle) -> Option<Vma> {
        let slot = self.slots.get(handle.0)?.lock();
        slot.live.as_ref().map(|live| live.vma)
    }

    /// All mappings of `pid`, in pool order.
    #[must_use]
    pub fn mappings(&self, pid: Pid) -> Vec<Vma> {
        self.slots
            .iter()
            .filter_map(|slot| slot.lock().owned_by(pid).copied())
            .collect()
    }

    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().refcnt == 0)
            .count()
    }

    /// Claims the first free slot. The slot stays locked until the
    /// reservation is committed or dropped.
    fn reserve(&self) -> Option<Reservation<'_, F>> {
        self.slots.iter().find_map(|slot| {
            let mut guard = slot.lock();
            (guard.refcnt == 0).then(|| {
                guard.refcnt = 1;
                Reservation {
                    guard,
                    committed: false,
                }
            })
        })
    }
}

impl<F> fmt::Debug for Mmap<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mmap")
            .field("nvma", &self.slots.len())
            .finish_non_exhaustive()
    }
}

/// A slot claimed for a mapping under construction. Dropping it without
/// [`commit`](Self::commit) hands the slot back.
struct Reservation<'a, F> {
    guard: SleepMutexGuard<'a, VmaSlot<F>>,
    committed: bool,
}

impl<F> Reservation<'_, F> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl<F> Deref for Reservation<'_, F> {
    type Target = VmaSlot<F>;

    fn deref(&self) -> &VmaSlot<F> {
        &self.guard
    }
}

impl<F> DerefMut for Reservation<'_, F> {
    fn deref_mut(&mut self) -> &mut VmaSlot<F> {
        &mut self.guard
    }
}

impl<F> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.refcnt = 0;
            self.guard.live = None;
        }
    }
}

fn unmap_locked<F, S>(
    slot: &mut VmaSlot<F>,
    space: &mut S,
    addr: VirtualAddress,
    len: u64,
) -> Result<Unmapped, MmapError>
where
    F: BackingFile,
    S: AddressSpace + ?Sized,
{
    let pid = space.pid();
    let Some(vma) = slot.owned_by(pid).copied() else {
        return Err(MmapError::NotMapped { addr });
    };
    if addr >= vma.end() {
        return Ok(Unmapped::default());
    }
    if addr < vma.addr {
        return Err(MmapError::NotMapped { addr });
    }

    let rest = vma.end().as_u64() - addr.as_u64();
    let len = len.min(rest);
    let reaches_end = len == rest;
    if addr != vma.addr && !reaches_end {
        return Err(MmapError::UnsupportedRange { addr, len });
    }
    // Pages are released whole, so a trimmed prefix is too.
    let (len, reaches_end) = if reaches_end {
        (len, true)
    } else {
        let whole = page_round_up(len).min(rest);
        (whole, whole == rest)
    };

    if reaches_end && addr > vma.addr {
        let kept = backed_len(space, vma.addr, addr.as_u64() - vma.addr.as_u64());
        if kept > 0 {
            warn!("munmap: {pid}: {kept:#x} backed bytes below {addr} outlive their mapping");
        }
    }

    let mut out = Unmapped::default();
    let backed = backed_len(space, addr, len);
    trace!("munmap: {pid}: {addr} + {len:#x}, {backed:#x} backed");
    if backed > 0 {
        if vma.writes_back()
            && let Some(live) = &slot.live
        {
            let offset = vma.offset + (addr.as_u64() - vma.addr.as_u64());
            if let Err(err) = write_back(&*live.file, space, addr, backed, offset, &mut out.written_back) {
                warn!("munmap: {pid}: write-back stopped after {:#x} bytes: {err}", out.written_back);
                out.writeback = Some(err);
            }
        }
        space.unmap_and_release(addr, backed);
        out.released = backed;
    }

    if reaches_end {
        slot.destroy();
        out.destroyed = true;
    } else if let Some(live) = &mut slot.live {
        live.vma.addr += len;
        live.vma.len -= len;
        live.vma.offset += len;
    }

    debug!(
        "munmap: {pid}: {addr} + {len:#x}{}",
        if out.destroyed { ", mapping destroyed" } else { "" }
    );
    Ok(out)
}

/// Length of the prefix of `[addr, addr + len)` that ends in a backed
/// page. Trailing pages that were never faulted in are not part of it.
fn backed_len<S: AddressSpace + ?Sized>(space: &S, addr: VirtualAddress, len: u64) -> u64 {
    let start = addr.as_u64();
    let mut end = start + len;
    while end > start && !space.is_mapped(VirtualAddress::new(end - 1)) {
        end = page_round_down(end - 1);
    }
    end.saturating_sub(start)
}

/// Copies the backed pages of `[addr, addr + len)` to the file at the
/// matching offsets, one bounded transaction per chunk. Unbacked pages are
/// skipped. `written` counts the bytes that made it.
fn write_back<F, S>(
    file: &F,
    space: &S,
    addr: VirtualAddress,
    len: u64,
    offset: u64,
    written: &mut u64,
) -> Result<(), WritebackError>
where
    F: BackingFile + ?Sized,
    S: AddressSpace + ?Sized,
{
    let mut chunk = vec![0u8; MAX_WRITE_CHUNK];
    let mut done = 0;
    while done < len {
        let va = addr + done;
        let page_end = page_round_down(va.as_u64()) + PAGE_SIZE - addr.as_u64();
        if !space.is_mapped(va) {
            done = page_end.min(len);
            continue;
        }

        // Stop at the page boundary if the next page has no frame.
        let mut end = (done + MAX_WRITE_CHUNK as u64).min(len);
        if end > page_end && !space.is_mapped(addr + page_end) {
            end = page_end;
        }
        let n = usize::try_from(end - done).map_or(MAX_WRITE_CHUNK, |n| n.min(MAX_WRITE_CHUNK));
        let buf = &mut chunk[..n];
        let at = offset + done;

        let result = {
            let _tx = Transaction::begin(file);
            space.copy_in(va, buf)?;
            file.write_at(at, buf)
        };

        match result {
            Ok(w) if w == n => {
                *written += n as u64;
                done = end;
            }
            Ok(w) => {
                *written += w as u64;
                return Err(WritebackError::Short {
                    offset: at,
                    written: w,
                    expected: n,
                });
            }
            Err(source) => return Err(WritebackError::Io { offset: at, source }),
        }
    }
    Ok(())
}
