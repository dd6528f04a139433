//! # Block Cache
//!
//! Keeps recently used disk blocks in memory, keyed by `(device, block)`,
//! and makes sure at most one context at a time works on a cached block.
//!
//! ```text
//!   get(dev, blockno)
//!        │ hash blockno
//!        ▼
//!   bucket[blockno % nbucket] ──► buf ──► buf ──► (sentinel)
//!        │ miss
//!        ▼
//!   eviction lock ──► CLOCK hand over the buffer pool ──► victim
//!                     re-tag, insert into the home bucket
//! ```
//!
//! * Each bucket has its own spin lock; lookups of blocks in different
//!   buckets never contend.
//! * Misses serialize on the eviction lock, which also guards the clock
//!   hand. Buffers are never freed, only recycled.
//! * A buffer's payload sits behind a [`SleepMutex`](kernel_sync::SleepMutex);
//!   [`BufGuard`] is the proof it is held, and dropping it releases both the
//!   lock and the reference.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_bio::{BioConfig, BlockCache, RamDisk};
//!
//! let cache = BlockCache::new(RamDisk::new(), BioConfig::default());
//!
//! let mut b = cache.read(1, 42).unwrap();
//! b.data_mut()[..5].copy_from_slice(b"hello");
//! cache.write(&b);
//! cache.release(b);
//!
//! assert_eq!(&cache.device().block(1, 42)[..5], b"hello");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod bucket;
mod buf;
mod cache;
mod device;

pub use buf::{BufGuard, NO_DEVICE, PinnedBuf};
pub use cache::{BioConfig, BioError, BlockCache, BufState, CacheStats};
pub use device::{BlockDevice, RamDisk};
pub use kernel_info::fs::BSIZE;
