//! Concurrency tests for the durable nonce counter
//!
//! Several allocators opened over the same database stand in for several
//! launcher processes sharing one store.

mod common;

use launcher::nonce_allocator::{NonceAllocator, SledNonceAllocator};
use launcher::NonceError;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_advances_never_hand_out_a_value_twice() {
    const CALLERS: u64 = 64;

    let db = common::temp_db();
    let seed = SledNonceAllocator::open(&db, "mainnet").unwrap();
    seed.initialize(0).await.unwrap();

    let mut handles = Vec::new();
    for n in 1..=CALLERS {
        let allocator = SledNonceAllocator::open(&db, "mainnet").unwrap();
        handles.push(tokio::spawn(async move { (n, allocator.advance_to(n).await) }));
    }

    let mut granted = HashSet::new();
    for handle in handles {
        let (requested, result) = handle.await.unwrap();
        match result {
            Ok(value) => {
                assert_eq!(value, requested);
                assert!(granted.insert(value), "value {} granted twice", value);
            }
            Err(NonceError::Stale { requested: r, current }) => {
                assert_eq!(r, requested);
                assert!(current >= requested);
            }
            Err(e) => panic!("unexpected error {}", e),
        }
    }

    assert!(granted.contains(&CALLERS));
    assert_eq!(seed.current().await.unwrap(), CALLERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocate_next_is_gap_free() {
    const CALLERS: usize = 40;
    const START: u64 = 100;

    let db = common::temp_db();
    let allocator = Arc::new(SledNonceAllocator::open(&db, "mainnet").unwrap());
    allocator.initialize(START).await.unwrap();

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let allocator = allocator.clone();
            tokio::spawn(async move { allocator.allocate_next().await.unwrap() })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap());
    }
    values.sort_unstable();

    let expected: Vec<u64> = (START..START + CALLERS as u64).collect();
    assert_eq!(values, expected);
    assert_eq!(allocator.current().await.unwrap(), START + CALLERS as u64);
}

#[tokio::test]
async fn test_counter_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = sled::open(dir.path()).unwrap();
        let allocator = SledNonceAllocator::open(&db, "mainnet").unwrap();
        allocator.initialize(5).await.unwrap();
        allocator.advance_to(9).await.unwrap();
        allocator.release(6).await.unwrap();
    }

    let db = sled::open(dir.path()).unwrap();
    let allocator = SledNonceAllocator::open(&db, "mainnet").unwrap();
    assert_eq!(allocator.current().await.unwrap(), 9);
    // A configured start value never rewinds an existing counter
    assert_eq!(allocator.initialize(0).await.unwrap(), 9);
    assert_eq!(allocator.allocate_next().await.unwrap(), 6);
    assert_eq!(allocator.allocate_next().await.unwrap(), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_released_nonces_are_reused_exactly_once() {
    const CALLERS: usize = 20;

    let db = common::temp_db();
    let allocator = Arc::new(SledNonceAllocator::open(&db, "mainnet").unwrap());
    allocator.initialize(0).await.unwrap();
    for _ in 0..10 {
        allocator.allocate_next().await.unwrap();
    }
    for nonce in [2u64, 5, 7] {
        allocator.release(nonce).await.unwrap();
    }

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let allocator = allocator.clone();
            tokio::spawn(async move { allocator.allocate_next().await.unwrap() })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap());
    }
    values.sort_unstable();

    let mut expected = vec![2u64, 5, 7];
    expected.extend(10..10 + (CALLERS as u64 - 3));
    assert_eq!(values, expected);
    assert_eq!(allocator.take_released().await.unwrap(), None);
}
