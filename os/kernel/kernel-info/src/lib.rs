//! # Kernel Configuration
//!
//! This crate is the single source of truth for the compile-time parameters
//! shared by the memory-management subsystems: the physical frame allocator,
//! the disk block cache and the memory-mapped region manager.
//!
//! ## Overview
//!
//! The three subsystems are sized statically, the way a small teaching kernel
//! sizes its tables in a `param.h`. Keeping every constant here prevents the
//! block cache and the region mapper from disagreeing about, say, the block
//! size used to chunk a write-back.
//!
//! ### Memory Layout ([`memory`])
//! * **Frame geometry**: page size and shift
//! * **Physical range**: default top of managed physical memory
//! * **Junk patterns**: bytes written into frames on allocation and release
//! * **Mapping area**: where per-process file mappings start growing downward
//!
//! ### File System Parameters ([`fs`])
//! * **Block geometry**: on-disk block size
//! * **Cache sizing**: number of cached buffers and hash buckets
//! * **Transactions**: maximum blocks a single file-system operation may touch
//! * **Mappings**: number of VMA slots in the system-wide pool
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::{fs, memory};
//!
//! assert_eq!(memory::PAGE_SIZE, 4096);
//! assert!(fs::NBUF >= fs::MAXOPBLOCKS);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod fs;
pub mod memory;
