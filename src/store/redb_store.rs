//! Durable reservation store backed by a single redb file.
//!
//! Each object is stored as its JSON text alongside a generation counter.
//! The conditional write reads the generation, compares it with the expected
//! version and installs the new object inside one write transaction, so two
//! writers can never both succeed against the same version.
//!
//! The database file is opened for each operation and closed afterwards.
//! That lets independent processes take turns on the same file; a process
//! that finds the file held open by another one gets a transient
//! [`StoreError::Unavailable`] and the coordinator retries.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use redb::Database;
use redb::ReadableTable;
use redb::TableDefinition;
use redb::TableError;
use tracing::debug;

use super::ReservationStore;
use super::VersionToken;
use super::VersionedTable;
use super::WriteOutcome;
use crate::error::StoreError;
use crate::table::ReservationTable;
use crate::verified::is_precondition_met;
use crate::verified::next_generation;

/// Object key -> persisted JSON.
const OBJECTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("reservation_objects");

/// Object key -> generation of the stored object.
const GENERATIONS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("reservation_generations");

/// A reservation store persisted in a redb database file.
#[derive(Debug, Clone)]
pub struct RedbReservationStore {
    path: PathBuf,
}

impl RedbReservationStore {
    /// Create or open a store at the given path.
    ///
    /// Creates the parent directory, the database file and both tables if they
    /// don't exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let label = path.display().to_string();

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(unavailable(&label))?;
        }

        let db = Database::create(&path).map_err(unavailable(&label))?;
        let write_txn = db.begin_write().map_err(unavailable(&label))?;
        {
            write_txn.open_table(OBJECTS_TABLE).map_err(unavailable(&label))?;
            write_txn.open_table(GENERATIONS_TABLE).map_err(unavailable(&label))?;
        }
        write_txn.commit().map_err(unavailable(&label))?;

        Ok(Self { path })
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path, key: &str) -> Result<Database, StoreError> {
        Database::create(path).map_err(unavailable(key))
    }

    fn read_blocking(path: &Path, key: &str) -> Result<VersionedTable, StoreError> {
        let db = Self::open(path, key)?;
        let read_txn = db.begin_read().map_err(unavailable(key))?;

        let generations = match read_txn.open_table(GENERATIONS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(VersionedTable::default()),
            Err(e) => return Err(unavailable(key)(e)),
        };
        let Some(generation) = generations.get(key).map_err(unavailable(key))?.map(|g| g.value()) else {
            return Ok(VersionedTable::default());
        };

        let objects = read_txn.open_table(OBJECTS_TABLE).map_err(unavailable(key))?;
        let json = objects
            .get(key)
            .map_err(unavailable(key))?
            .map(|value| value.value().to_string())
            .ok_or_else(|| StoreError::Corrupted {
                key: key.to_string(),
                reason: format!("generation {generation} has no stored object"),
            })?;

        Ok(VersionedTable {
            table: ReservationTable::from_json(key, &json)?,
            version: Some(VersionToken::from_generation(generation)),
        })
    }

    fn write_blocking(
        path: &Path,
        key: &str,
        json: &str,
        expected: Option<VersionToken>,
    ) -> Result<WriteOutcome, StoreError> {
        let db = Self::open(path, key)?;
        let write_txn = db.begin_write().map_err(unavailable(key))?;

        let committed = {
            let mut generations = write_txn.open_table(GENERATIONS_TABLE).map_err(unavailable(key))?;
            let current = generations.get(key).map_err(unavailable(key))?.map(|g| g.value());

            if is_precondition_met(current, expected.map(|version| version.generation())) {
                let generation = next_generation(current);
                generations.insert(key, generation).map_err(unavailable(key))?;
                let mut objects = write_txn.open_table(OBJECTS_TABLE).map_err(unavailable(key))?;
                objects.insert(key, json).map_err(unavailable(key))?;
                Some(generation)
            } else {
                debug!(key, ?current, ?expected, "generation mismatch");
                None
            }
        };

        match committed {
            Some(generation) => {
                write_txn.commit().map_err(unavailable(key))?;
                Ok(WriteOutcome::Committed(VersionToken::from_generation(generation)))
            }
            None => {
                write_txn.abort().map_err(unavailable(key))?;
                Ok(WriteOutcome::Conflict)
            }
        }
    }
}

/// Map any backend failure to a transient error for `key`.
fn unavailable<E: fmt::Display>(key: &str) -> impl FnOnce(E) -> StoreError + '_ {
    move |e| StoreError::Unavailable {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn join_failed(key: &str, e: tokio::task::JoinError) -> StoreError {
    StoreError::Unavailable {
        key: key.to_string(),
        reason: format!("storage task failed: {e}"),
    }
}

#[async_trait]
impl ReservationStore for RedbReservationStore {
    async fn read(&self, key: &str) -> Result<VersionedTable, StoreError> {
        let path = self.path.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || Self::read_blocking(&path, &owned_key))
            .await
            .map_err(|e| join_failed(key, e))?
    }

    async fn write(
        &self,
        key: &str,
        table: &ReservationTable,
        expected: Option<VersionToken>,
    ) -> Result<WriteOutcome, StoreError> {
        let json = table.to_json(key)?;
        let path = self.path.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || Self::write_blocking(&path, &owned_key, &json, expected))
            .await
            .map_err(|e| join_failed(key, e))?
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::block::AddressBlock;

    fn block(s: &str) -> AddressBlock {
        s.parse().unwrap()
    }

    fn create_test_store() -> (RedbReservationStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbReservationStore::new(temp_dir.path().join("reservations.redb")).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_read_missing_object() {
        let (store, _dir) = create_test_store();
        let snapshot = store.read("k").await.unwrap();
        assert!(snapshot.table.is_empty());
        assert_eq!(snapshot.version, None);
    }

    #[tokio::test]
    async fn test_conditional_write() {
        let (store, _dir) = create_test_store();
        let table = ReservationTable::new().with_reservation("a", block("10.0.0.0/24"));

        let WriteOutcome::Committed(v1) = store.write("k", &table, None).await.unwrap() else {
            panic!("create should commit");
        };
        assert_eq!(store.write("k", &table, None).await.unwrap(), WriteOutcome::Conflict);

        let snapshot = store.read("k").await.unwrap();
        assert_eq!(snapshot.version, Some(v1));
        assert_eq!(snapshot.table, table);

        let grown = table.with_reservation("b", block("10.0.1.0/24"));
        assert!(matches!(store.write("k", &grown, Some(v1)).await.unwrap(), WriteOutcome::Committed(_)));
        assert_eq!(store.write("k", &grown, Some(v1)).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(store.read("k").await.unwrap().table, grown);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (store, _dir) = create_test_store();
        let table = ReservationTable::new().with_reservation("a", block("10.0.0.0/24"));

        store.write("one", &table, None).await.unwrap();
        assert!(store.read("two").await.unwrap().table.is_empty());
        assert!(matches!(store.write("two", &table, None).await.unwrap(), WriteOutcome::Committed(_)));
    }

    #[test]
    fn test_new_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("reservations.redb");
        let store = RedbReservationStore::new(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert!(path.exists());
    }
}
