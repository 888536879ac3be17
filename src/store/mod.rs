//! Versioned reservation storage.
//!
//! A [`ReservationStore`] holds one reservation table per object key and
//! supports exactly two operations: read the table together with an opaque
//! [`VersionToken`], and write a whole table conditionally on that token.
//! Conflicting writes are a normal [`WriteOutcome`], not an error.
//!
//! Backends:
//!
//! - [`DeterministicReservationStore`]: in-memory, with fault injection for tests
//! - [`RedbReservationStore`]: durable single-file store

pub mod memory;
pub mod redb_store;

use async_trait::async_trait;

pub use self::memory::DeterministicReservationStore;
pub use self::memory::InjectedFault;
pub use self::redb_store::RedbReservationStore;
use crate::error::StoreError;
use crate::table::ReservationTable;

/// Opaque version of a stored object, issued on read and echoed on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionToken(u64);

impl VersionToken {
    /// Wrap a backend generation number.
    pub fn from_generation(generation: u64) -> Self {
        Self(generation)
    }

    /// The backend generation number.
    pub fn generation(&self) -> u64 {
        self.0
    }
}

/// A table snapshot and the version it was read at.
///
/// `version` is `None` when no object exists yet; the table is then empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedTable {
    /// The reservations at read time.
    pub table: ReservationTable,
    /// Version to pass back to [`ReservationStore::write`].
    pub version: Option<VersionToken>,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied; the object now has this version.
    Committed(VersionToken),
    /// The object changed since it was read. Nothing was written.
    Conflict,
}

/// Storage for versioned reservation tables.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Read the table stored under `key`.
    async fn read(&self, key: &str) -> Result<VersionedTable, StoreError>;

    /// Replace the table under `key` if its version still equals `expected`.
    ///
    /// `expected == None` succeeds only when no object exists yet.
    async fn write(
        &self,
        key: &str,
        table: &ReservationTable,
        expected: Option<VersionToken>,
    ) -> Result<WriteOutcome, StoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: ReservationStore + ?Sized> ReservationStore for std::sync::Arc<T> {
    async fn read(&self, key: &str) -> Result<VersionedTable, StoreError> {
        (**self).read(key).await
    }

    async fn write(
        &self,
        key: &str,
        table: &ReservationTable,
        expected: Option<VersionToken>,
    ) -> Result<WriteOutcome, StoreError> {
        (**self).write(key, table, expected).await
    }
}
