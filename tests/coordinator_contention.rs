//! Concurrency tests for reservations sharing one store.
//!
//! Tests cover:
//! - Many tasks allocating against the same table never receive overlapping blocks
//! - A foreign commit between read and write forces a retry on a fresh snapshot
//! - Exhausted retry budgets surface as retryable errors
//!
//! # Tiger Style
//!
//! - Bounded task counts and retry budgets
//! - The in-memory store is deterministic, so every interleaving is reproducible

use std::sync::Arc;
use std::time::Duration;

use cidr_reservator::AddressBlock;
use cidr_reservator::CidrReservator;
use cidr_reservator::DeterministicReservationStore;
use cidr_reservator::InjectedFault;
use cidr_reservator::ReservationError;
use cidr_reservator::ReservationStore;
use cidr_reservator::ReservationTable;
use cidr_reservator::RetryConfig;
use cidr_reservator::storage_key;
use cidr_reservator::verified::verify_disjoint;
use proptest::prelude::*;

// =============================================================================
// Helpers
// =============================================================================

fn block(s: &str) -> AddressBlock {
    s.parse().unwrap()
}

fn no_backoff(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        backoff_unit: Duration::ZERO,
    }
}

async fn stored_table(store: &DeterministicReservationStore, base: AddressBlock) -> ReservationTable {
    store.read(&storage_key(base)).await.unwrap().table
}

// =============================================================================
// Contention
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_are_disjoint() {
    const TASKS: u32 = 8;
    let base = block("10.116.0.0/14");
    let store = DeterministicReservationStore::new();

    let mut handles = Vec::new();
    for i in 0..TASKS {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let reservator = CidrReservator::new(store, base, no_backoff(TASKS));
            reservator.allocate(&format!("cluster-{i}"), 22).await
        }));
    }

    let mut allocated = Vec::new();
    for handle in handles {
        allocated.push(handle.await.unwrap().unwrap());
    }

    assert!(verify_disjoint(&allocated).is_ok(), "overlapping blocks: {allocated:?}");
    assert!(allocated.iter().all(|b| base.contains_block(b)));
    assert_eq!(store.commit_count(), u64::from(TASKS));

    let table = stored_table(&store, base).await;
    assert_eq!(table.len(), TASKS as usize);
    let mut stored = table.blocks();
    stored.sort();
    allocated.sort();
    assert_eq!(stored, allocated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mixed_sizes_are_disjoint() {
    let base = block("10.5.0.0/16");
    let store = DeterministicReservationStore::new();
    let prefixes: [u8; 6] = [24, 26, 20, 28, 24, 22];

    let mut handles = Vec::new();
    for (i, prefix) in prefixes.into_iter().enumerate() {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let reservator = CidrReservator::new(store, base, no_backoff(prefixes.len() as u32));
            reservator.allocate(&format!("svc-{i}"), prefix).await
        }));
    }

    let mut allocated = Vec::new();
    for handle in handles {
        allocated.push(handle.await.unwrap().unwrap());
    }

    assert!(verify_disjoint(&allocated).is_ok(), "overlapping blocks: {allocated:?}");
    let table = stored_table(&store, base).await;
    assert_eq!(table.len(), prefixes.len());
}

#[tokio::test]
async fn test_foreign_commit_moves_allocation() {
    let base = block("10.5.0.0/16");
    let store = DeterministicReservationStore::new();
    let reservator = CidrReservator::new(store.clone(), base, no_backoff(4));

    // The foreign writer takes exactly the block the first attempt picks.
    store
        .inject_fault(InjectedFault::ForeignReservation {
            name: "other".to_string(),
            block: block("10.5.0.0/24"),
        })
        .await;

    let ours = reservator.allocate("ours", 24).await.unwrap();
    assert_eq!(ours, block("10.5.1.0/24"));
    assert_eq!(store.conflict_count(), 1);
    assert_eq!(store.commit_count(), 1);

    let table = stored_table(&store, base).await;
    assert_eq!(table.get("other"), Some(block("10.5.0.0/24")));
    assert_eq!(table.get("ours"), Some(ours));
}

#[tokio::test]
async fn test_foreign_commit_of_same_name_is_reported() {
    let base = block("10.5.0.0/16");
    let store = DeterministicReservationStore::new();
    let reservator = CidrReservator::new(store.clone(), base, no_backoff(4));

    store
        .inject_fault(InjectedFault::ForeignReservation {
            name: "db".to_string(),
            block: block("10.5.8.0/24"),
        })
        .await;

    let err = reservator.allocate("db", 26).await.unwrap_err();
    assert!(matches!(err, ReservationError::NameTaken { .. }), "got {err:?}");
    assert_eq!(stored_table(&store, base).await.get("db"), Some(block("10.5.8.0/24")));
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhausted_is_retryable() {
    let base = block("10.5.0.0/16");
    let store = DeterministicReservationStore::new();
    let reservator = CidrReservator::new(store.clone(), base, RetryConfig {
        max_attempts: 3,
        backoff_unit: Duration::from_millis(100),
    });

    for _ in 0..3 {
        store.inject_fault(InjectedFault::Conflict).await;
    }

    let started = tokio::time::Instant::now();
    let err = reservator.allocate("app", 24).await.unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
    assert!(matches!(err, ReservationError::StoreConflict { attempts: 3, .. }), "got {err:?}");

    // Backoff of 2 * n * unit after attempts 1 and 2.
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(store.commit_count(), 0);
    assert!(stored_table(&store, base).await.is_empty());
}

// =============================================================================
// Property Tests
// =============================================================================

fn foreign_and_own_prefixes() -> impl Strategy<Value = (Vec<u8>, u8)> {
    (prop::collection::vec(20u8..=28, 0..6), 20u8..=28)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Foreign commits racing our write never lead to overlapping blocks.
    #[test]
    fn test_proptest_foreign_commits_never_overlap((foreign, own) in foreign_and_own_prefixes()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let base = block("10.5.0.0/16");
            let store = DeterministicReservationStore::new();
            let budget = foreign.len() as u32 + 1;
            let reservator = CidrReservator::new(store.clone(), base, no_backoff(budget));

            // Each foreign writer takes the block that allocation would pick next,
            // as if it had won the race for that write.
            let mut snapshot = Vec::new();
            for (i, prefix) in foreign.iter().enumerate() {
                let taken = cidr_reservator::verified::allocate(base, &snapshot, *prefix).unwrap();
                snapshot.push(taken);
                store
                    .inject_fault(InjectedFault::ForeignReservation {
                        name: format!("foreign-{i}"),
                        block: taken,
                    })
                    .await;
            }

            let ours = reservator.allocate("ours", own).await.unwrap();
            let table = stored_table(&store, base).await;
            prop_assert_eq!(table.len(), foreign.len() + 1);
            prop_assert_eq!(table.get("ours"), Some(ours));
            prop_assert!(verify_disjoint(&table.blocks()).is_ok());
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_shared_store_keeps_base_ranges_apart() {
    let store = DeterministicReservationStore::new();
    let east = CidrReservator::new(store.clone(), block("10.116.0.0/14"), no_backoff(2));
    let west = CidrReservator::new(store.clone(), block("10.5.0.0/16"), no_backoff(2));

    let a = east.allocate("app", 24).await.unwrap();
    let b = west.allocate("app", 24).await.unwrap();

    assert_eq!(a, block("10.116.0.0/24"));
    assert_eq!(b, block("10.5.0.0/24"));
    assert_ne!(east.storage_key(), west.storage_key());
    assert_eq!(Arc::strong_count(&store), 3);
}
