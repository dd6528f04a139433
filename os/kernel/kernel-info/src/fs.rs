//! # File System Parameters

/// Size of a disk block, in bytes.
pub const BSIZE: usize = 1024;

/// Maximum number of blocks any single file-system operation writes.
pub const MAXOPBLOCKS: usize = 10;

/// Size of the on-disk log, in blocks.
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// Number of buffers in the block cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of hash buckets in the block cache.
///
/// Prime, so block numbers with a common stride still spread out.
pub const NBUCKET: usize = 19;

/// Number of slots in the system-wide VMA pool.
pub const NVMA: usize = 16;

/// Largest number of bytes one `writei` call may write inside a transaction.
///
/// Each write may dirty the inode block, an indirect block, an allocation
/// block and, for a non-aligned write, two data blocks per chunk.
pub const MAX_WRITE_CHUNK: usize = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;

const _: () = {
    assert!(BSIZE.is_power_of_two());
    assert!(NBUF >= MAXOPBLOCKS);
    assert!(NBUCKET > 0);
    assert!(MAX_WRITE_CHUNK > 0);
};
