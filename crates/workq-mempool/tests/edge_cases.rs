//! Edge case tests for the slice pool

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use workq_mempool::{calc_slice_size, MemoryPool, PoolError};

// ============================================================================
// CAPACITY
// ============================================================================

#[test]
fn test_exhaustion_then_recovery() {
    let pool = MemoryPool::new("scenario-a", 64, 2);

    let first = pool.alloc().expect("first alloc");
    let _second = pool.alloc().expect("second alloc");

    match pool.alloc() {
        Err(PoolError::Exhausted { pool: name, capacity }) => {
            assert_eq!(name, "scenario-a");
            assert_eq!(capacity, 2);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }

    pool.free(first);
    assert!(pool.alloc().is_ok());
}

#[test]
fn test_fails_exactly_at_cap() {
    let pool = MemoryPool::new("exact", 8, 3);
    let mut held = Vec::new();

    // Walk a mixed alloc/free sequence and check the failure condition each step
    for step in 0..64 {
        let stats = pool.stats();
        let result = pool.alloc();
        let should_fail = stats.total == 3 && stats.free == 0;
        assert_eq!(result.is_err(), should_fail, "step {}", step);
        if let Ok(slice) = result {
            held.push(slice);
        }
        if step % 4 == 3 {
            held.truncate(held.len().saturating_sub(2));
        }
        assert!(pool.outstanding() <= 3);
    }
}

#[test]
fn test_unlimited_pool_grows() {
    let pool = MemoryPool::new("unbounded", 8, 0);
    let held: Vec<_> = (0..256).map(|_| pool.alloc().unwrap()).collect();
    assert_eq!(pool.outstanding(), 256);
    assert_eq!(pool.failures(), 0);
    drop(held);
    assert_eq!(pool.exit().total, 0);
}

// ============================================================================
// SLICES
// ============================================================================

#[test]
fn test_slice_size_rounded() {
    let pool = MemoryPool::new("odd", 13, 0);
    assert_eq!(pool.slice_size(), calc_slice_size(13));

    let mut slice = pool.alloc().unwrap();
    assert_eq!(slice.len(), pool.slice_size());
    assert_eq!(slice.as_ptr() as usize % std::mem::align_of::<usize>(), 0);

    slice[..13].copy_from_slice(b"hello, world!");
    assert_eq!(&slice[..5], b"hello");
}

#[test]
fn test_fresh_slices_zeroed() {
    let pool = MemoryPool::new("zero", 32, 0);
    let slice = pool.alloc().unwrap();
    assert!(slice.iter().all(|&b| b == 0));
}

#[test]
fn test_raw_round_trip_keeps_slice_out() {
    let pool = MemoryPool::new("raw", 16, 1);
    let raw = pool.alloc().unwrap().into_raw();
    assert_eq!(pool.outstanding(), 1);
    assert!(pool.alloc().is_err());

    // SAFETY: raw came from into_raw on this pool and was never freed.
    let slice = unsafe { workq_mempool::Slice::from_raw(&pool, raw) };
    drop(slice);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_slices_cross_threads() {
    let pool = MemoryPool::new("xthread", 16, 4);
    let freed = Arc::new(AtomicUsize::new(0));

    let slices: Vec<_> = (0..4).map(|_| pool.alloc().unwrap()).collect();
    let handles: Vec<_> = slices
        .into_iter()
        .map(|mut slice| {
            let freed = Arc::clone(&freed);
            thread::spawn(move || {
                slice[0] = 7;
                drop(slice);
                freed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(freed.load(Ordering::SeqCst), 4);
    assert_eq!(pool.stats().free, 4);
}

#[test]
fn test_slice_outlives_pool_handle() {
    let pool = MemoryPool::new("outlive", 16, 0);
    let slice = pool.alloc().unwrap();
    let clone = pool.clone();
    drop(pool);

    assert_eq!(slice.pool_name(), "outlive");
    drop(slice);
    assert_eq!(clone.stats().free, 1);
}
