//! In-memory reservation store for tests.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use super::ReservationStore;
use super::VersionToken;
use super::VersionedTable;
use super::WriteOutcome;
use crate::block::AddressBlock;
use crate::error::StoreError;
use crate::table::ReservationTable;
use crate::verified::is_precondition_met;
use crate::verified::next_generation;

/// A failure to inject into the next matching store operation.
///
/// Faults are queued and consumed in order: a read only consumes
/// `UnavailableRead`, a write consumes any of the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFault {
    /// The next read fails with a transient error.
    UnavailableRead,
    /// The next write reports a conflict without touching the object.
    Conflict,
    /// The next write fails with a transient error.
    UnavailableWrite,
    /// Another writer commits this reservation just before the next write.
    ForeignReservation {
        /// Name the foreign writer reserves.
        name: String,
        /// Block the foreign writer reserves.
        block: AddressBlock,
    },
}

/// Stored JSON object and its generation.
#[derive(Clone)]
struct StoredObject {
    json: String,
    generation: u64,
}

/// A deterministic in-memory reservation store.
///
/// Objects are kept as the same JSON a durable backend would persist, so
/// decoding is exercised on every read. Generations increase per object on
/// every committed write.
pub struct DeterministicReservationStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    faults: Mutex<VecDeque<InjectedFault>>,
    reads: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl Default for DeterministicReservationStore {
    fn default() -> Self {
        Self::new_inner()
    }
}

impl DeterministicReservationStore {
    /// Create a new deterministic store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::new_inner())
    }

    fn new_inner() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(VecDeque::new()),
            reads: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Queue a fault for a later operation.
    pub async fn inject_fault(&self, fault: InjectedFault) {
        self.faults.lock().await.push_back(fault);
    }

    /// Overwrite `key` unconditionally, bumping its generation.
    pub async fn seed(&self, key: &str, table: &ReservationTable) -> Result<VersionToken, StoreError> {
        let json = table.to_json(key)?;
        let mut objects = self.objects.write().await;
        let generation = next_generation(objects.get(key).map(|object| object.generation));
        objects.insert(key.to_string(), StoredObject { json, generation });
        Ok(VersionToken::from_generation(generation))
    }

    /// Store raw bytes under `key`, e.g. to simulate a corrupted object.
    pub async fn seed_raw(&self, key: &str, json: impl Into<String>) {
        let mut objects = self.objects.write().await;
        let generation = next_generation(objects.get(key).map(|object| object.generation));
        objects.insert(key.to_string(), StoredObject {
            json: json.into(),
            generation,
        });
    }

    /// The JSON currently stored under `key`.
    pub async fn stored_json(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|object| object.json.clone())
    }

    /// Number of reads served, including failed ones.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of committed writes.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of writes rejected by the version check.
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::SeqCst)
    }

    async fn take_fault(&self, for_read: bool) -> Option<InjectedFault> {
        let mut faults = self.faults.lock().await;
        let applies = match faults.front() {
            Some(InjectedFault::UnavailableRead) => for_read,
            Some(_) => !for_read,
            None => false,
        };
        if applies { faults.pop_front() } else { None }
    }

    fn apply_foreign_reservation(
        objects: &mut BTreeMap<String, StoredObject>,
        key: &str,
        name: String,
        block: AddressBlock,
    ) -> Result<(), StoreError> {
        let current = objects.get(key);
        let table = match current {
            Some(object) => ReservationTable::from_json(key, &object.json)?,
            None => ReservationTable::new(),
        };
        let json = table.with_reservation(name, block).to_json(key)?;
        let generation = next_generation(current.map(|object| object.generation));
        objects.insert(key.to_string(), StoredObject { json, generation });
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for DeterministicReservationStore {
    async fn read(&self, key: &str) -> Result<VersionedTable, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.take_fault(true).await.is_some() {
            return Err(StoreError::Unavailable {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            });
        }

        let objects = self.objects.read().await;
        match objects.get(key) {
            Some(object) => Ok(VersionedTable {
                table: ReservationTable::from_json(key, &object.json)?,
                version: Some(VersionToken::from_generation(object.generation)),
            }),
            None => Ok(VersionedTable::default()),
        }
    }

    async fn write(
        &self,
        key: &str,
        table: &ReservationTable,
        expected: Option<VersionToken>,
    ) -> Result<WriteOutcome, StoreError> {
        let json = table.to_json(key)?;
        let fault = self.take_fault(false).await;
        let mut objects = self.objects.write().await;

        match fault {
            Some(InjectedFault::UnavailableWrite) => {
                return Err(StoreError::Unavailable {
                    key: key.to_string(),
                    reason: "injected write failure".to_string(),
                });
            }
            Some(InjectedFault::Conflict) => {
                self.conflicts.fetch_add(1, Ordering::SeqCst);
                return Ok(WriteOutcome::Conflict);
            }
            Some(InjectedFault::ForeignReservation { name, block }) => {
                debug!(key, name = %name, block = %block, "injecting foreign reservation");
                Self::apply_foreign_reservation(&mut objects, key, name, block)?;
            }
            Some(InjectedFault::UnavailableRead) | None => {}
        }

        let current = objects.get(key).map(|object| object.generation);
        if !is_precondition_met(current, expected.map(|version| version.generation())) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Ok(WriteOutcome::Conflict);
        }

        let generation = next_generation(current);
        objects.insert(key.to_string(), StoredObject { json, generation });
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Committed(VersionToken::from_generation(generation)))
    }
}
