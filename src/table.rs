//! The named reservation table persisted per base range.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::block::AddressBlock;
use crate::constants::STORAGE_KEY_PREFIX;
use crate::constants::STORAGE_KEY_SUFFIX;
use crate::error::StoreError;

/// Reservation name to block mapping.
///
/// Serialized as `{"subnets": {"<name>": "<a.b.c.d>/<prefix>", ...}}`. Tables
/// are treated as immutable snapshots: mutations produce a new table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationTable {
    #[serde(default)]
    subnets: BTreeMap<String, AddressBlock>,
}

impl ReservationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block reserved under `name`.
    pub fn get(&self, name: &str) -> Option<AddressBlock> {
        self.subnets.get(name).copied()
    }

    /// Whether `name` is reserved.
    pub fn contains_name(&self, name: &str) -> bool {
        self.subnets.contains_key(name)
    }

    /// Number of reservations.
    pub fn len(&self) -> usize {
        self.subnets.len()
    }

    /// Whether the table holds no reservations.
    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }

    /// Reservations in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, AddressBlock)> + '_ {
        self.subnets.iter().map(|(name, block)| (name.as_str(), *block))
    }

    /// Every reserved block, in name order.
    pub fn blocks(&self) -> Vec<AddressBlock> {
        self.subnets.values().copied().collect()
    }

    /// Copy of this table with `name` set to `block`.
    pub fn with_reservation(&self, name: impl Into<String>, block: AddressBlock) -> Self {
        let mut next = self.clone();
        next.subnets.insert(name.into(), block);
        next
    }

    /// Copy of this table without `name`.
    pub fn without_reservation(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.subnets.remove(name);
        next
    }

    /// Encode the persisted JSON object.
    pub fn to_json(&self, key: &str) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::Corrupted {
            key: key.to_string(),
            reason: format!("failed to encode reservation table: {e}"),
        })
    }

    /// Decode the persisted JSON object stored under `key`.
    pub fn from_json(key: &str, json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|e| StoreError::Corrupted {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl FromIterator<(String, AddressBlock)> for ReservationTable {
    fn from_iter<I: IntoIterator<Item = (String, AddressBlock)>>(iter: I) -> Self {
        Self {
            subnets: iter.into_iter().collect(),
        }
    }
}

/// Object key holding the table for `base_range`.
///
/// # Example
///
/// ```ignore
/// let base: AddressBlock = "10.116.0.0/14".parse()?;
/// assert_eq!(storage_key(base), "cidr-reservation/baseCidr-10-116-0-0-14.json");
/// ```
pub fn storage_key(base_range: AddressBlock) -> String {
    let notation = base_range.to_string().replace(['.', '/'], "-");
    format!("{STORAGE_KEY_PREFIX}{notation}{STORAGE_KEY_SUFFIX}")
}
