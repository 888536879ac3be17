//! Error types for CIDR reservations.
//!
//! Three layers, leaf first:
//!
//! - [`AllocationError`]: the pure allocator refused a request
//! - [`StoreError`]: a reservation store backend failed
//! - [`ReservationError`]: what callers of [`crate::CidrReservator`] see

use snafu::Snafu;

use crate::block::AddressBlock;

/// Errors from block arithmetic and the gap-filling allocator.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum AllocationError {
    /// The request or the reservation table is malformed.
    #[snafu(display("invalid input: {reason}"))]
    InvalidInput {
        /// Description of what was rejected.
        reason: String,
    },

    /// No block of the requested size fits inside the base range.
    #[snafu(display("base range {base_range} is exhausted"))]
    BaseRangeExhausted {
        /// The exhausted base range.
        base_range: AddressBlock,
    },

    /// The next block after an anchor would wrap the address space.
    #[snafu(display("maximum address exhausted after {anchor}"))]
    MaximumAddressExhausted {
        /// The block the search tried to step past.
        anchor: AddressBlock,
    },

    /// A computed block overlaps an existing reservation.
    ///
    /// This indicates an allocator defect and is never retried.
    #[snafu(display("allocated block {candidate} overlaps existing reservation {conflicting}"))]
    InvariantViolation {
        /// The block the allocator produced.
        candidate: AddressBlock,
        /// The reservation it collides with.
        conflicting: AddressBlock,
    },
}

impl AllocationError {
    /// Returns true when the base range (or the address space) has no room left.
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            AllocationError::BaseRangeExhausted { .. } | AllocationError::MaximumAddressExhausted { .. }
        )
    }
}

/// Errors from a [`crate::store::ReservationStore`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The backend could not be reached or is busy. Retrying may succeed.
    #[snafu(display("store unavailable for '{key}': {reason}"))]
    Unavailable {
        /// Object key of the failed operation.
        key: String,
        /// Description of the failure.
        reason: String,
    },

    /// The stored object cannot be decoded.
    #[snafu(display("corrupted reservation object '{key}': {reason}"))]
    Corrupted {
        /// The key with corrupted data.
        key: String,
        /// Description of what went wrong.
        reason: String,
    },
}

impl StoreError {
    /// Returns true when retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Errors from reservation operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReservationError {
    /// The allocator rejected the request.
    #[snafu(display("{source}"))]
    Allocation {
        /// The underlying allocation error.
        source: AllocationError,
    },

    /// Reservation names must be non-empty.
    #[snafu(display("reservation name must not be empty"))]
    InvalidName,

    /// A reservation with this name already exists.
    #[snafu(display("reservation '{name}' already exists as {block}"))]
    NameTaken {
        /// The requested name.
        name: String,
        /// The block currently reserved under that name.
        block: AddressBlock,
    },

    /// No reservation with this name exists.
    #[snafu(display("reservation '{name}' does not exist"))]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// Concurrent writers kept winning until the attempt budget ran out.
    #[snafu(display("conflicting writes to '{key}' persisted after {attempts} attempts"))]
    StoreConflict {
        /// Object key being updated.
        key: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The store stayed unavailable until the attempt budget ran out.
    #[snafu(display("store unavailable for '{key}' after {attempts} attempts: {source}"))]
    StoreUnavailable {
        /// Object key being updated.
        key: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last transient failure.
        source: StoreError,
    },

    /// Permanent storage failure.
    #[snafu(display("storage error: {source}"))]
    Storage {
        /// The underlying error.
        source: StoreError,
    },

    /// The operation was cancelled before it committed.
    #[snafu(display("operation on '{key}' cancelled"))]
    Cancelled {
        /// Object key being updated.
        key: String,
    },
}

impl ReservationError {
    /// Returns true when the caller may retry the whole operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReservationError::StoreConflict { .. } | ReservationError::StoreUnavailable { .. })
    }

    /// Returns true when the base range has no room for the request.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ReservationError::Allocation { source } if source.is_exhausted())
    }

    /// Returns true when the allocator produced an overlapping block.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            ReservationError::Allocation {
                source: AllocationError::InvariantViolation { .. }
            }
        )
    }
}

impl From<AllocationError> for ReservationError {
    fn from(source: AllocationError) -> Self {
        ReservationError::Allocation { source }
    }
}

impl From<StoreError> for ReservationError {
    fn from(source: StoreError) -> Self {
        ReservationError::Storage { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_names_base_range() {
        let base_range: AddressBlock = "10.116.0.0/14".parse().unwrap();
        let err = AllocationError::BaseRangeExhausted { base_range };
        assert_eq!(err.to_string(), "base range 10.116.0.0/14 is exhausted");
        assert!(err.is_exhausted());
    }

    #[test]
    fn test_reservation_error_passes_allocation_message_through() {
        let base_range: AddressBlock = "10.5.0.0/16".parse().unwrap();
        let err = ReservationError::from(AllocationError::BaseRangeExhausted { base_range });
        assert_eq!(err.to_string(), "base range 10.5.0.0/16 is exhausted");
        assert!(err.is_exhausted());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        let conflict = ReservationError::StoreConflict {
            key: "k".into(),
            attempts: 4,
        };
        assert!(conflict.is_retryable());

        let unavailable = ReservationError::StoreUnavailable {
            key: "k".into(),
            attempts: 4,
            source: StoreError::Unavailable {
                key: "k".into(),
                reason: "busy".into(),
            },
        };
        assert!(unavailable.is_retryable());

        let corrupted = ReservationError::from(StoreError::Corrupted {
            key: "k".into(),
            reason: "bad json".into(),
        });
        assert!(!corrupted.is_retryable());

        let invalid = ReservationError::from(AllocationError::InvalidInput { reason: "x".into() });
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn test_store_error_transience() {
        assert!(
            StoreError::Unavailable {
                key: "k".into(),
                reason: "locked".into()
            }
            .is_transient()
        );
        assert!(
            !StoreError::Corrupted {
                key: "k".into(),
                reason: "bad".into()
            }
            .is_transient()
        );
    }
}
