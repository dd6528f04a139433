//! # Physical Frame Allocation
//!
//! Hands out 4 KiB physical frames and tracks how many owners share each one.
//!
//! ```text
//! kernel_end (rounded up)                                     phys_top
//! │                                                               │
//! ├──────────────┬────────────────────────────────────────────────┤
//! │ ref counts   │ allocatable frames                             │
//! │ (metadata)   │ free list: LIFO stack of frames with count 0   │
//! └──────────────┴────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! * [`frame_alloc`]: the [`FrameAllocator`] itself. A frame's count is 0
//!   exactly while it sits on the free list. [`FrameAllocator::allocate`]
//!   sets it to 1, [`FrameAllocator::add_reference`] bumps it for every
//!   additional owner (shared or copy-on-write pages), and
//!   [`FrameAllocator::release`] drops it, returning the frame once the last
//!   owner lets go.
//! * [`phys_memory`]: the [`PhysMemory`] trait through which the allocator
//!   touches frame contents, plus [`HostPhysMemory`], a byte arena standing
//!   in for RAM when running hosted.
//!
//! Freshly allocated frames are filled with [`ALLOC_JUNK`] and released
//! frames with [`FREE_JUNK`], so code that reads memory it never wrote, or
//! keeps using a frame after releasing it, sees garbage instead of stale
//! data.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{FrameAllocator, HostPhysMemory, PhysMemory};
//! use kernel_info::memory::{ALLOC_JUNK, KERNBASE, PAGE_SIZE};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let start = PhysicalAddress::new(KERNBASE);
//! let top = start + 16 * PAGE_SIZE;
//! let memory = HostPhysMemory::new(start, 16 * PAGE_SIZE);
//! let frames = FrameAllocator::new(start, top, memory).unwrap();
//!
//! let page = frames.allocate().unwrap();
//! assert_eq!(frames.ref_count(page.base()), Some(1));
//!
//! let mut byte = [0u8; 1];
//! frames.memory().read(page.base(), &mut byte);
//! assert_eq!(byte[0], ALLOC_JUNK);
//!
//! frames.release(page.base());
//! assert_eq!(frames.ref_count(page.base()), Some(0));
//! ```
//!
//! [`ALLOC_JUNK`]: kernel_info::memory::ALLOC_JUNK
//! [`FREE_JUNK`]: kernel_info::memory::FREE_JUNK

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod frame_alloc;
pub mod phys_memory;

pub use frame_alloc::{FrameAlloc, FrameAllocError, FrameAllocator};
pub use phys_memory::{HostPhysMemory, PhysMemory};
