use kernel_bio::{BSIZE, BioConfig, BioError, BlockCache, RamDisk};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const DEV: u32 = 1;

fn cache(nbuf: usize, nbucket: usize) -> BlockCache<RamDisk> {
    let _ = env_logger::builder().is_test(true).try_init();
    BlockCache::new(RamDisk::new(), BioConfig { nbuf, nbucket })
}

#[test]
fn read_transfers_once() {
    let cache = cache(4, 3);
    let mut block = [0u8; BSIZE];
    block[..4].copy_from_slice(b"disk");
    cache.device().preload(DEV, 7, &block);

    let b = cache.read(DEV, 7).unwrap();
    assert!(b.is_valid());
    assert_eq!(&b.data()[..4], b"disk");
    cache.release(b);

    let b = cache.read(DEV, 7).unwrap();
    assert_eq!(&b.data()[..4], b"disk");
    drop(b);

    assert_eq!(cache.device().reads(), 1);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[test]
fn get_does_not_read() {
    let cache = cache(2, 1);
    let b = cache.get(DEV, 3).unwrap();
    assert!(!b.is_valid());
    assert_eq!((b.dev(), b.blockno()), (DEV, 3));
    drop(b);
    assert_eq!(cache.device().reads(), 0);
}

#[test]
fn written_block_survives_eviction() {
    let cache = cache(2, 3);

    let mut b = cache.read(DEV, 5).unwrap();
    b.data_mut()[..3].copy_from_slice(b"abc");
    cache.write(&b);
    cache.release(b);
    assert_eq!(cache.device().writes(), 1);

    for blockno in 6..9 {
        drop(cache.read(DEV, blockno).unwrap());
    }
    assert_eq!(cache.copies(DEV, 5), 0, "block 5 should have been recycled");

    let reads = cache.device().reads();
    let b = cache.read(DEV, 5).unwrap();
    assert_eq!(&b.data()[..3], b"abc");
    assert_eq!(cache.device().reads(), reads + 1);
}

#[test]
fn clock_spares_recent_buffers_once() {
    let cache = cache(3, 2);
    for blockno in 1..=3 {
        drop(cache.read(DEV, blockno).unwrap());
    }

    // All three are idle with the clock bit set; the scan clears all bits,
    // wraps around and takes the first one.
    drop(cache.read(DEV, 4).unwrap());
    assert_eq!(cache.copies(DEV, 1), 0);
    assert_eq!(cache.copies(DEV, 2), 1);
    assert_eq!(cache.copies(DEV, 3), 1);

    // The hand now sits past the victim, on block 2.
    drop(cache.read(DEV, 5).unwrap());
    assert_eq!(cache.copies(DEV, 2), 0);
    assert_eq!(cache.copies(DEV, 3), 1);
}

#[test]
fn pin_keeps_buffer_resident() {
    let cache = cache(2, 2);

    let b = cache.read(DEV, 1).unwrap();
    assert_eq!(cache.ref_count(DEV, 1), Some(1));
    let pin = cache.pin(&b);
    assert_eq!(cache.ref_count(DEV, 1), Some(2));
    cache.release(b);
    assert_eq!(cache.ref_count(DEV, 1), Some(1));

    for blockno in 2..12 {
        drop(cache.read(DEV, blockno).unwrap());
        assert_eq!(cache.ref_count(DEV, 1), Some(1));
    }
    assert_eq!(cache.copies(DEV, 1), 1);

    assert_eq!((pin.dev(), pin.blockno()), (DEV, 1));
    cache.unpin(pin);
    assert_eq!(cache.ref_count(DEV, 1), Some(0));
}

#[test]
fn dropped_guard_unlocks_before_unreferencing() {
    let cache = cache(1, 1);
    let b = cache.read(DEV, 9).unwrap();
    let pin = cache.pin(&b);
    drop(b);
    assert_eq!(cache.ref_count(DEV, 9), Some(1));

    // still referenced by the pin, but no longer locked
    let again = thread::scope(|s| s.spawn(|| cache.get(DEV, 9).map(|b| b.is_valid())).join());
    assert_eq!(again.unwrap(), Ok(true));
    assert_eq!(cache.ref_count(DEV, 9), Some(1));

    drop(pin);
    assert_eq!(cache.ref_count(DEV, 9), Some(0));
    assert!(cache.get(DEV, 10).is_ok());
}

#[test]
fn fully_referenced_cache_reports_no_buffers() {
    let cache = cache(2, 2);
    let a = cache.read(DEV, 1).unwrap();
    let b = cache.read(DEV, 2).unwrap();

    assert_eq!(cache.get(DEV, 3).unwrap_err(), BioError::NoBuffers { nbuf: 2 });
    assert_eq!(cache.stats().exhausted, 1);

    // a hit still works while everything is referenced
    let pin = cache.pin(&b);
    drop(b);
    let b = cache.read(DEV, 2).unwrap();
    assert_eq!(cache.ref_count(DEV, 2), Some(2));
    drop(pin);

    drop(a);
    let c = cache.get(DEV, 3).unwrap();
    assert_eq!(c.blockno(), 3);
    assert_eq!(cache.copies(DEV, 1), 0);
    drop((b, c));

    let rows = cache.dump();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.refcnt == 0));
}

#[test]
#[should_panic(expected = "reserved")]
fn reserved_device_id_panics() {
    let cache = cache(2, 2);
    let _ = cache.get(kernel_bio::NO_DEVICE, 0);
}

/// Eight buffers, seven of them pinned: ten contexts share the eighth.
#[test]
fn single_free_buffer_serves_many_contexts() {
    let cache = Arc::new(BlockCache::new(
        RamDisk::new(),
        BioConfig {
            nbuf: 8,
            nbucket: 5,
        },
    ));

    let pins: Vec<_> = (0..7)
        .map(|blockno| {
            let b = cache.read(DEV, blockno).unwrap();
            let pin = cache.pin(&b);
            cache.release(b);
            pin
        })
        .collect();

    let contexts = 10;
    let start = Arc::new(Barrier::new(contexts));
    let done = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..contexts)
        .map(|n| {
            let cache = Arc::clone(&cache);
            let start = Arc::clone(&start);
            let done = Arc::clone(&done);
            let blockno = 100 + u32::try_from(n).unwrap();
            thread::spawn(move || {
                start.wait();
                let mut b = loop {
                    match cache.read(DEV, blockno) {
                        Ok(b) => break b,
                        Err(BioError::NoBuffers { .. }) => thread::yield_now(),
                    }
                };
                assert_eq!(b.blockno(), blockno);
                assert_eq!(cache.copies(DEV, blockno), 1);
                b.data_mut()[0] = 0xEE;
                cache.write(&b);
                cache.release(b);
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(done.load(Ordering::SeqCst), contexts);
    for n in 0..10 {
        assert_eq!(cache.device().block(DEV, 100 + n)[0], 0xEE);
    }
    for blockno in 0..7 {
        assert_eq!(cache.ref_count(DEV, blockno), Some(1));
    }
    drop(pins);
    assert!(cache.dump().iter().all(|r| r.refcnt == 0));
}

#[test]
fn concurrent_first_access_yields_one_copy() {
    let threads = 8;
    let iters = 200;
    let cache = Arc::new(BlockCache::new(
        RamDisk::new(),
        BioConfig {
            nbuf: 10,
            nbucket: 3,
        },
    ));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|n| {
            let cache = Arc::clone(&cache);
            let start = Arc::clone(&start);
            let churn = 10 + u32::try_from(n % 4).unwrap();
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    let mut b = cache.read(DEV, 3).unwrap();
                    assert_eq!(cache.copies(DEV, 3), 1);
                    let count = u32::from_le_bytes(b.data()[..4].try_into().unwrap());
                    b.data_mut()[..4].copy_from_slice(&(count + 1).to_le_bytes());
                    cache.write(&b);
                    drop(b);

                    drop(cache.read(DEV, churn).unwrap());
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cache.copies(DEV, 3), 1);
    let b = cache.read(DEV, 3).unwrap();
    let count = u32::from_le_bytes(b.data()[..4].try_into().unwrap());
    assert_eq!(count, u32::try_from(threads * iters).unwrap());
    drop(b);
    assert!(cache.dump().iter().all(|r| r.refcnt == 0));
}
