//! Named subnet reservations inside one base range.
//!
//! [`CidrReservator`] ties the pure allocator to a shared store: each
//! operation is one coordinator cycle whose mutation runs the allocator (or a
//! plain insert/remove) against the freshly read table.

use std::sync::Arc;

use snafu::OptionExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::block::AddressBlock;
use crate::constants::ADDRESS_BITS;
use crate::coordinator::ReservationCoordinator;
use crate::coordinator::RetryConfig;
use crate::error::AllocationError;
use crate::error::InvalidNameSnafu;
use crate::error::NameTakenSnafu;
use crate::error::NotFoundSnafu;
use crate::error::ReservationError;
use crate::store::ReservationStore;
use crate::table::ReservationTable;
use crate::table::storage_key;
use crate::verified;

/// Allocates and releases named blocks of one base range.
///
/// Safe to use from many tasks and processes at once against the same store:
/// concurrent callers never receive overlapping blocks.
pub struct CidrReservator<S: ReservationStore + ?Sized> {
    coordinator: ReservationCoordinator<S>,
    base_range: AddressBlock,
    key: String,
}

impl<S: ReservationStore + ?Sized> CidrReservator<S> {
    /// Create a reservator for `base_range`, stored under its derived key.
    pub fn new(store: Arc<S>, base_range: AddressBlock, config: RetryConfig) -> Self {
        Self {
            coordinator: ReservationCoordinator::new(store, config),
            key: storage_key(base_range),
            base_range,
        }
    }

    /// Use `cancel` to abandon in-flight operations.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.coordinator = self.coordinator.with_cancellation(cancel);
        self
    }

    /// Get the cancellation token for this reservator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.coordinator.cancel_token()
    }

    /// The range every reservation lies in.
    pub fn base_range(&self) -> AddressBlock {
        self.base_range
    }

    /// Object key of the reservation table.
    pub fn storage_key(&self) -> &str {
        &self.key
    }

    /// Reserve the next free block of `prefix_length` under `name`.
    ///
    /// Fails with `NameTaken` if `name` already holds a block. A prefix length
    /// that can never fit the base range is rejected before the store is read.
    pub async fn allocate(&self, name: &str, prefix_length: u8) -> Result<AddressBlock, ReservationError> {
        ensure_valid_name(name)?;
        ensure_valid_prefix(self.base_range, prefix_length)?;
        let base_range = self.base_range;

        let table = self
            .coordinator
            .apply(&self.key, |table| {
                if let Some(existing) = table.get(name) {
                    return NameTakenSnafu { name, block: existing }.fail();
                }
                let block = verified::allocate(base_range, &table.blocks(), prefix_length)?;
                Ok(Some(table.with_reservation(name, block)))
            })
            .await?;

        let block = table.get(name).context(NotFoundSnafu { name })?;
        info!(key = %self.key, name, block = %block, "allocated block");
        Ok(block)
    }

    /// Drop the reservation held by `name`.
    ///
    /// Returns the freed block, or `None` (without writing) if `name` holds
    /// nothing.
    pub async fn release(&self, name: &str) -> Result<Option<AddressBlock>, ReservationError> {
        ensure_valid_name(name)?;
        let mut released = None;

        self.coordinator
            .apply(&self.key, |table| {
                released = table.get(name);
                Ok(released.map(|_| table.without_reservation(name)))
            })
            .await?;

        if let Some(block) = released {
            info!(key = %self.key, name, block = %block, "released block");
        }
        Ok(released)
    }

    /// The block held by `name`, if any.
    pub async fn lookup(&self, name: &str) -> Result<Option<AddressBlock>, ReservationError> {
        Ok(self.coordinator.read(&self.key).await?.get(name))
    }

    /// Every reservation in the base range.
    pub async fn list(&self) -> Result<ReservationTable, ReservationError> {
        self.coordinator.read(&self.key).await
    }

    /// Move the block held by `from` to the name `to`.
    ///
    /// Fails with `NotFound` if `from` holds nothing and `NameTaken` if `to`
    /// already holds a block.
    pub async fn rename(&self, from: &str, to: &str) -> Result<AddressBlock, ReservationError> {
        ensure_valid_name(from)?;
        ensure_valid_name(to)?;

        let table = self
            .coordinator
            .apply(&self.key, |table| {
                let block = table.get(from).context(NotFoundSnafu { name: from })?;
                if from == to {
                    return Ok(None);
                }
                if let Some(existing) = table.get(to) {
                    return NameTakenSnafu { name: to, block: existing }.fail();
                }
                Ok(Some(table.without_reservation(from).with_reservation(to, block)))
            })
            .await?;

        let block = table.get(to).context(NotFoundSnafu { name: to })?;
        info!(key = %self.key, from, to, block = %block, "renamed reservation");
        Ok(block)
    }

    /// Give `name` a block of `prefix_length` instead of its current one.
    ///
    /// The new block is allocated while the old one is still reserved, so the
    /// two never overlap and the old block can be retired after the new one is
    /// in use. Returns the current block unchanged when the size already
    /// matches.
    pub async fn resize(&self, name: &str, prefix_length: u8) -> Result<AddressBlock, ReservationError> {
        ensure_valid_name(name)?;
        ensure_valid_prefix(self.base_range, prefix_length)?;
        let base_range = self.base_range;

        let table = self
            .coordinator
            .apply(&self.key, |table| {
                let current = table.get(name).context(NotFoundSnafu { name })?;
                if current.prefix_length() == prefix_length {
                    return Ok(None);
                }
                let block = verified::allocate(base_range, &table.blocks(), prefix_length)?;
                Ok(Some(table.with_reservation(name, block)))
            })
            .await?;

        let block = table.get(name).context(NotFoundSnafu { name })?;
        info!(key = %self.key, name, block = %block, "resized reservation");
        Ok(block)
    }
}

fn ensure_valid_name(name: &str) -> Result<(), ReservationError> {
    if name.trim().is_empty() {
        return InvalidNameSnafu.fail();
    }
    Ok(())
}

fn ensure_valid_prefix(base_range: AddressBlock, prefix_length: u8) -> Result<(), ReservationError> {
    if prefix_length > ADDRESS_BITS {
        return Err(AllocationError::InvalidInput {
            reason: format!("prefix length {prefix_length} exceeds {ADDRESS_BITS}"),
        }
        .into());
    }
    if prefix_length < base_range.prefix_length() {
        return Err(AllocationError::InvalidInput {
            reason: format!("prefix length /{prefix_length} is larger than base range {base_range}"),
        }
        .into());
    }
    Ok(())
}
