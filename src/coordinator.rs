//! Read-modify-write coordination over a versioned reservation store.
//!
//! The coordinator never computes allocations itself. It reads a snapshot,
//! hands it to a caller-supplied mutation, and writes the result back
//! conditionally on the snapshot's version. When another writer got there
//! first, the whole cycle runs again against a fresh read.
//!
//! # Guarantees
//!
//! 1. **Fresh snapshots**: every attempt starts from a new read
//! 2. **Single winner**: among attempts holding the same version, at most one write commits
//! 3. **Bounded retries**: at most `max_attempts` cycles per call
//! 4. **Honest outcomes**: cancellation abandons reads and backoff sleeps, but a
//!    conditional write that has started always runs to completion and its
//!    outcome is reported

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::DEFAULT_BACKOFF_UNIT_MS;
use crate::constants::DEFAULT_MAX_ATTEMPTS;
use crate::constants::MAX_RESERVATION_ATTEMPTS_LIMIT;
use crate::error::ReservationError;
use crate::error::StoreError;
use crate::store::ReservationStore;
use crate::store::WriteOutcome;
use crate::table::ReservationTable;
use crate::verified::compute_retry_delay;
use crate::verified::should_retry;

/// Retry policy for read-modify-write cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total number of cycles before giving up.
    pub max_attempts: u32,
    /// The sleep after the n-th failed cycle is `2 * n` units.
    pub backoff_unit: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: Duration::from_millis(DEFAULT_BACKOFF_UNIT_MS),
        }
    }
}

/// Why an attempt has to be repeated.
enum RetryCause {
    Conflict,
    Unavailable(StoreError),
}

impl RetryCause {
    fn into_error(self, key: &str, attempts: u32) -> ReservationError {
        match self {
            RetryCause::Conflict => ReservationError::StoreConflict {
                key: key.to_string(),
                attempts,
            },
            RetryCause::Unavailable(source) => ReservationError::StoreUnavailable {
                key: key.to_string(),
                attempts,
                source,
            },
        }
    }
}

enum AttemptOutcome {
    /// The table as committed, or as read when nothing had to change.
    Done(ReservationTable),
    Retry(RetryCause),
}

/// Runs mutations against a [`ReservationStore`] with optimistic concurrency.
pub struct ReservationCoordinator<S: ReservationStore + ?Sized> {
    store: Arc<S>,
    config: RetryConfig,
    cancel: CancellationToken,
}

impl<S: ReservationStore + ?Sized> ReservationCoordinator<S> {
    /// Create a coordinator.
    ///
    /// `max_attempts` is clamped into `1..=MAX_RESERVATION_ATTEMPTS_LIMIT`.
    pub fn new(store: Arc<S>, mut config: RetryConfig) -> Self {
        config.max_attempts = config.max_attempts.clamp(1, MAX_RESERVATION_ATTEMPTS_LIMIT);
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abandon in-flight cycles.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get the cancellation token for this coordinator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The effective retry policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Read the current table, retrying transient failures.
    pub async fn read(&self, key: &str) -> Result<ReservationTable, ReservationError> {
        self.apply(key, |_| Ok(None)).await
    }

    /// Apply `mutation` to the table under `key` until a write commits.
    ///
    /// The mutation sees an immutable snapshot and returns the replacement
    /// table, or `None` when nothing needs to change (no write happens). It may
    /// run once per attempt, so it must not have effects beyond its result and
    /// its captured state.
    ///
    /// # Errors
    ///
    /// - Any error returned by `mutation`, immediately and without writing
    /// - `StoreConflict` / `StoreUnavailable` once the attempt budget is spent
    /// - `Storage` for permanent store failures
    /// - `Cancelled` when the cancellation token fires before a write starts
    ///
    /// Cancellation is checked around the read and the backoff sleep only. A
    /// backend may finish a write on another thread even if its future is
    /// dropped, so once the write is issued it is awaited and its result
    /// returned, even when the token fired in the meantime.
    pub async fn apply<F>(&self, key: &str, mut mutation: F) -> Result<ReservationTable, ReservationError>
    where F: FnMut(&ReservationTable) -> Result<Option<ReservationTable>, ReservationError> + Send {
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            let cause = match self.run_attempt(key, attempt, &mut mutation).await? {
                AttemptOutcome::Done(table) => return Ok(table),
                AttemptOutcome::Retry(cause) => cause,
            };

            if !should_retry(attempt, self.config.max_attempts) {
                warn!(key, attempts = attempt, "retry budget exhausted");
                return Err(cause.into_error(key, attempt));
            }

            let delay = compute_retry_delay(attempt, self.config.backoff_unit);
            debug!(key, attempt, ?delay, "backing off before retry");
            self.until_cancelled(key, tokio::time::sleep(delay)).await?;
        }
    }

    /// One read -> mutate -> conditional write cycle.
    async fn run_attempt<F>(
        &self,
        key: &str,
        attempt: u32,
        mutation: &mut F,
    ) -> Result<AttemptOutcome, ReservationError>
    where
        F: FnMut(&ReservationTable) -> Result<Option<ReservationTable>, ReservationError> + Send,
    {
        let snapshot = match self.until_cancelled(key, self.store.read(key)).await? {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_transient() => {
                warn!(key, attempt, error = %e, "read failed, will retry");
                return Ok(AttemptOutcome::Retry(RetryCause::Unavailable(e)));
            }
            Err(e) => return Err(ReservationError::Storage { source: e }),
        };
        debug!(
            key,
            attempt,
            reservations = snapshot.table.len(),
            version = ?snapshot.version,
            "read reservation table"
        );

        let proposed = match mutation(&snapshot.table) {
            Ok(Some(proposed)) => proposed,
            Ok(None) => return Ok(AttemptOutcome::Done(snapshot.table)),
            Err(e) => {
                if e.is_invariant_violation() {
                    error!(key, attempt, error = %e, "allocator produced an overlapping block");
                }
                return Err(e);
            }
        };

        let outcome = self.store.write(key, &proposed, snapshot.version).await;
        match outcome {
            Ok(WriteOutcome::Committed(version)) => {
                info!(
                    key,
                    attempt,
                    generation = version.generation(),
                    reservations = proposed.len(),
                    "committed reservation table"
                );
                Ok(AttemptOutcome::Done(proposed))
            }
            Ok(WriteOutcome::Conflict) => {
                warn!(key, attempt, "concurrent update detected, retrying");
                Ok(AttemptOutcome::Retry(RetryCause::Conflict))
            }
            Err(e) if e.is_transient() => {
                warn!(key, attempt, error = %e, "write failed, will retry");
                Ok(AttemptOutcome::Retry(RetryCause::Unavailable(e)))
            }
            Err(e) => Err(ReservationError::Storage { source: e }),
        }
    }

    /// Race `operation` against the cancellation token.
    async fn until_cancelled<T>(&self, key: &str, operation: impl Future<Output = T>) -> Result<T, ReservationError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(key, "operation cancelled");
                Err(ReservationError::Cancelled { key: key.to_string() })
            }
            output = operation => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::AddressBlock;
    use crate::error::AllocationError;
    use crate::store::DeterministicReservationStore;
    use crate::store::InjectedFault;

    const KEY: &str = "cidr-reservation/baseCidr-10-0-0-0-16.json";

    fn block(s: &str) -> AddressBlock {
        s.parse().unwrap()
    }

    fn coordinator(store: &Arc<DeterministicReservationStore>) -> ReservationCoordinator<DeterministicReservationStore> {
        ReservationCoordinator::new(store.clone(), RetryConfig::default())
    }

    fn insert(name: &'static str, cidr: &'static str) -> impl FnMut(&ReservationTable) -> Result<Option<ReservationTable>, ReservationError> + Send {
        move |table| Ok(Some(table.with_reservation(name, block(cidr))))
    }

    #[tokio::test]
    async fn test_apply_commits_first_attempt() {
        let store = DeterministicReservationStore::new();
        let table = coordinator(&store).apply(KEY, insert("a", "10.0.0.0/24")).await.unwrap();

        assert_eq!(table.get("a"), Some(block("10.0.0.0/24")));
        assert_eq!(store.read_count(), 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_retries_after_conflict() {
        let store = DeterministicReservationStore::new();
        store.inject_fault(InjectedFault::Conflict).await;

        let start = tokio::time::Instant::now();
        coordinator(&store).apply(KEY, insert("a", "10.0.0.0/24")).await.unwrap();

        assert_eq!(store.read_count(), 2);
        assert_eq!(store.conflict_count(), 1);
        assert_eq!(store.commit_count(), 1);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_gives_up_after_budget() {
        let store = DeterministicReservationStore::new();
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            store.inject_fault(InjectedFault::Conflict).await;
        }

        let start = tokio::time::Instant::now();
        let err = coordinator(&store).apply(KEY, insert("a", "10.0.0.0/24")).await.unwrap_err();

        assert!(matches!(err, ReservationError::StoreConflict { attempts: 4, .. }), "{err}");
        assert!(err.is_retryable());
        assert_eq!(store.read_count(), 4);
        assert_eq!(store.commit_count(), 0);
        // Sleeps of 2, 4 and 6 units between the four attempts.
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(start.elapsed() < Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_retries_transient_failures() {
        let store = DeterministicReservationStore::new();
        store.inject_fault(InjectedFault::UnavailableRead).await;
        store.inject_fault(InjectedFault::UnavailableWrite).await;

        let table = coordinator(&store).apply(KEY, insert("a", "10.0.0.0/24")).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(store.read_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_reports_persistent_unavailability() {
        let store = DeterministicReservationStore::new();
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            store.inject_fault(InjectedFault::UnavailableRead).await;
        }

        let err = coordinator(&store).apply(KEY, insert("a", "10.0.0.0/24")).await.unwrap_err();
        assert!(matches!(err, ReservationError::StoreUnavailable { attempts: 4, .. }), "{err}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_apply_does_not_retry_permanent_failure() {
        let store = DeterministicReservationStore::new();
        store.seed_raw(KEY, "{not json").await;

        let err = coordinator(&store).apply(KEY, insert("a", "10.0.0.0/24")).await.unwrap_err();
        assert!(matches!(err, ReservationError::Storage { .. }), "{err}");
        assert!(!err.is_retryable());
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_mutation_error_skips_write() {
        let store = DeterministicReservationStore::new();
        let err = coordinator(&store)
            .apply(KEY, |_| Err(ReservationError::NotFound { name: "x".into() }))
            .await
            .unwrap_err();

        assert!(matches!(err, ReservationError::NotFound { .. }));
        assert_eq!(store.read_count(), 1);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_table_skips_write() {
        let store = DeterministicReservationStore::new();
        let seeded = ReservationTable::new().with_reservation("a", block("10.0.0.0/24"));
        store.seed(KEY, &seeded).await.unwrap();

        let table = coordinator(&store).read(KEY).await.unwrap();
        assert_eq!(table, seeded);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_mutation_sees_fresh_snapshot_after_conflict() {
        let store = DeterministicReservationStore::new();
        store
            .inject_fault(InjectedFault::ForeignReservation {
                name: "foreign".into(),
                block: block("10.0.0.0/24"),
            })
            .await;

        let config = RetryConfig {
            max_attempts: 2,
            backoff_unit: Duration::ZERO,
        };
        let mut sizes = Vec::new();
        let table = ReservationCoordinator::new(store.clone(), config)
            .apply(KEY, |table| {
                sizes.push(table.len());
                Ok(Some(table.with_reservation("mine", block("10.0.1.0/24"))))
            })
            .await
            .unwrap();

        assert_eq!(sizes, vec![0, 1]);
        assert!(table.contains_name("foreign"));
        assert!(table.contains_name("mine"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = DeterministicReservationStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = coordinator(&store)
            .with_cancellation(cancel)
            .apply(KEY, insert("a", "10.0.0.0/24"))
            .await
            .unwrap_err();

        assert!(matches!(err, ReservationError::Cancelled { .. }));
        assert_eq!(store.read_count(), 0);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_backoff() {
        let store = DeterministicReservationStore::new();
        store.inject_fault(InjectedFault::Conflict).await;

        let coordinator = coordinator(&store);
        let cancel = coordinator.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let err = coordinator.apply(KEY, insert("a", "10.0.0.0/24")).await.unwrap_err();
        assert!(matches!(err, ReservationError::Cancelled { .. }));
        assert_eq!(store.read_count(), 1);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_backoff_is_still_cancellable() {
        let store = DeterministicReservationStore::new();
        store.inject_fault(InjectedFault::Conflict).await;

        let coordinator = ReservationCoordinator::new(store.clone(), RetryConfig {
            max_attempts: 2,
            backoff_unit: Duration::MAX,
        });
        let cancel = coordinator.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let err = coordinator.apply(KEY, insert("a", "10.0.0.0/24")).await.unwrap_err();
        assert!(matches!(err, ReservationError::Cancelled { .. }));
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_invariant_violation_is_not_retried() {
        let store = DeterministicReservationStore::new();
        let err = coordinator(&store)
            .apply(KEY, |_| {
                Err(AllocationError::InvariantViolation {
                    candidate: block("10.0.0.128/25"),
                    conflicting: block("10.0.0.0/24"),
                }
                .into())
            })
            .await
            .unwrap_err();

        assert!(err.is_invariant_violation(), "{err}");
        assert!(!err.is_retryable());
        assert_eq!(store.read_count(), 1);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_started_write_completes_after_cancel() {
        let store = DeterministicReservationStore::new();
        let coordinator = coordinator(&store);
        let cancel = coordinator.cancel_token();

        let table = coordinator
            .apply(KEY, |table| {
                cancel.cancel();
                Ok(Some(table.with_reservation("a", block("10.0.0.0/24"))))
            })
            .await
            .unwrap();

        assert_eq!(table.get("a"), Some(block("10.0.0.0/24")));
        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.read(KEY).await.unwrap().table, table);
    }

    #[test]
    fn test_attempt_budget_is_clamped() {
        let store = DeterministicReservationStore::new();
        let zero = ReservationCoordinator::new(store.clone(), RetryConfig {
            max_attempts: 0,
            backoff_unit: Duration::ZERO,
        });
        assert_eq!(zero.config().max_attempts, 1);

        let huge = ReservationCoordinator::new(store, RetryConfig {
            max_attempts: u32::MAX,
            backoff_unit: Duration::ZERO,
        });
        assert_eq!(huge.config().max_attempts, MAX_RESERVATION_ATTEMPTS_LIMIT);
    }
}
