//! # File Mappings
//!
//! A fixed pool of VMAs, each describing one range of an open file mapped
//! into one process.
//!
//! ## Placement
//!
//! Every process has a mapping cursor that starts at
//! [`MMAP_TOP`](kernel_info::memory::MMAP_TOP) and only moves down. A new
//! mapping takes whole pages directly below the cursor:
//!
//! ```text
//!            MMAP_TOP ┌──────────────┐
//!                     │  mapping #1  │
//!                     ├──────────────┤
//!                     │  mapping #2  │
//!     cursor (after)  ├──────────────┤
//!                     │      ...     │
//! ```
//!
//! Pages are not populated here; the page-fault handler backs them on first
//! touch. Unmapping therefore only writes back and releases the part of a
//! range that was actually faulted in.
//!
//! ## Locking
//!
//! Each slot sits behind its own [`SleepMutex`](kernel_sync::SleepMutex),
//! held across file write-back. Scans ([`Mmap::find_mapping`], slot
//! reservation) lock one slot at a time.
//!
//! ## Collaborators
//!
//! The page table and the file system are reached through the
//! [`AddressSpace`] and [`BackingFile`] traits.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod collab;
mod mmap;
mod vma;

pub use collab::{AddressSpace, BackingFile, Fault, FileError, Pid};
pub use mmap::{MapRequest, Mmap, MmapConfig, MmapError, Unmapped, WritebackError};
pub use vma::{Prot, Sharing, Vma, VmaHandle};
