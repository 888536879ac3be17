//! Gap-filling block allocation.
//!
//! Given a base range, the blocks already reserved inside it and a requested
//! prefix length, [`allocate`] picks the next block to hand out. The search
//! runs in three phases and the first one to produce a block wins:
//!
//! 1. **Lowest gap.** The first block of the requested size in the base range,
//!    if it is free.
//! 2. **Anchor search.** Reservations are scanned from the highest address
//!    down. Each one is an *anchor* and proposes the block right after it. Size
//!    classes widen one bit at a time from the requested prefix towards the
//!    base range's prefix.
//! 3. **Top of range.** The block right after the highest reservation.
//!
//! The result is then checked against the base range and against every
//! existing reservation.
//!
//! # Tiger Style
//!
//! - Input tables are bounded by `MAX_RESERVATIONS_PER_TABLE`
//! - Size-class widening is a bounded loop over at most 32 classes

use crate::block::AddressBlock;
use crate::constants::ADDRESS_BITS;
use crate::constants::MAX_RESERVATIONS_PER_TABLE;
use crate::error::AllocationError;
use crate::verified::block::contains;
use crate::verified::block::contains_block;
use crate::verified::block::next_subnet;
use crate::verified::block::nth_subnet;
use crate::verified::block::overlaps;
use crate::verified::block::verify_disjoint;

/// Compute the next available block of `requested_prefix` inside `base_range`.
///
/// `reserved` is an immutable snapshot; its order does not matter.
///
/// # Errors
///
/// - `InvalidInput`: prefix longer than 32, prefix shorter than the base range
///   while reservations exist, or a snapshot with blocks outside the base
///   range or overlapping each other
/// - `BaseRangeExhausted` / `MaximumAddressExhausted`: no room
/// - `InvariantViolation`: the chosen block collides with a reservation
pub fn allocate(
    base_range: AddressBlock,
    reserved: &[AddressBlock],
    requested_prefix: u8,
) -> Result<AddressBlock, AllocationError> {
    validate_request(base_range, reserved, requested_prefix)?;

    if let Some(candidate) = lowest_free_block(base_range, reserved, requested_prefix)? {
        return Ok(candidate);
    }

    let descending = sort_descending(reserved);
    let candidate = match anchor_search(base_range, &descending, requested_prefix)? {
        Some(candidate) => candidate,
        None => top_of_range(base_range, &descending, requested_prefix)?,
    };

    verify_candidate(base_range, reserved, candidate)
}

// ============================================================================
// Pre-checks
// ============================================================================

fn validate_request(
    base_range: AddressBlock,
    reserved: &[AddressBlock],
    requested_prefix: u8,
) -> Result<(), AllocationError> {
    if requested_prefix > ADDRESS_BITS {
        return Err(AllocationError::InvalidInput {
            reason: format!("prefix length {requested_prefix} exceeds {ADDRESS_BITS}"),
        });
    }
    if reserved.len() > MAX_RESERVATIONS_PER_TABLE as usize {
        return Err(AllocationError::InvalidInput {
            reason: format!(
                "{} reservations exceed the limit of {MAX_RESERVATIONS_PER_TABLE}",
                reserved.len()
            ),
        });
    }
    if reserved.is_empty() {
        return Ok(());
    }

    if requested_prefix < base_range.prefix_length() {
        return Err(AllocationError::InvalidInput {
            reason: format!("prefix length /{requested_prefix} is larger than base range {base_range}"),
        });
    }
    if let Some(outside) = reserved.iter().find(|block| !contains_block(base_range, **block)) {
        return Err(AllocationError::InvalidInput {
            reason: format!("reservation {outside} lies outside base range {base_range}"),
        });
    }
    verify_disjoint(reserved).map_err(|overlap| AllocationError::InvalidInput {
        reason: format!("reservations overlap: {overlap}"),
    })
}

// ============================================================================
// Phases
// ============================================================================

/// Phase 1: the first block of the base range, when nothing occupies it.
fn lowest_free_block(
    base_range: AddressBlock,
    reserved: &[AddressBlock],
    requested_prefix: u8,
) -> Result<Option<AddressBlock>, AllocationError> {
    let candidate = nth_subnet(base_range, requested_prefix, 0)?;
    if reserved.iter().all(|block| !overlaps(*block, candidate)) {
        Ok(Some(candidate))
    } else {
        Ok(None)
    }
}

/// Phase 2: propose the block after each anchor, widening the size class.
///
/// In the first class every reservation of the requested size or smaller is
/// an anchor, and a proposal inside the previous proposal is skipped. Later
/// classes only use reservations of exactly that class's size.
fn anchor_search(
    base_range: AddressBlock,
    descending: &[AddressBlock],
    requested_prefix: u8,
) -> Result<Option<AddressBlock>, AllocationError> {
    let mut previous_proposal: Option<AddressBlock> = None;
    for (index, anchor) in descending.iter().enumerate() {
        if anchor.prefix_length() < requested_prefix {
            continue;
        }
        let proposal = next_subnet(*anchor, requested_prefix)?;
        if is_acceptable(base_range, descending, index, proposal, previous_proposal) {
            return Ok(Some(proposal));
        }
        previous_proposal = Some(proposal);
    }

    for class in (base_range.prefix_length()..requested_prefix).rev() {
        for (index, anchor) in descending.iter().enumerate() {
            if anchor.prefix_length() != class {
                continue;
            }
            let proposal = next_subnet(*anchor, requested_prefix)?;
            if is_acceptable(base_range, descending, index, proposal, None) {
                return Ok(Some(proposal));
            }
        }
    }

    Ok(None)
}

/// Phase 3: the block after the highest reservation.
fn top_of_range(
    base_range: AddressBlock,
    descending: &[AddressBlock],
    requested_prefix: u8,
) -> Result<AddressBlock, AllocationError> {
    match descending.first() {
        Some(highest) => next_subnet(*highest, requested_prefix),
        None => Err(AllocationError::BaseRangeExhausted { base_range }),
    }
}

fn is_acceptable(
    base_range: AddressBlock,
    descending: &[AddressBlock],
    index: usize,
    proposal: AddressBlock,
    previous_proposal: Option<AddressBlock>,
) -> bool {
    if !contains(base_range, proposal.base()) {
        return false;
    }
    let Some(higher) = index.checked_sub(1).and_then(|i| descending.get(i)) else {
        return true;
    };
    if overlaps(proposal, *higher) {
        return false;
    }
    !matches!(previous_proposal, Some(previous) if contains(previous, proposal.base()))
}

// ============================================================================
// Post-checks
// ============================================================================

fn verify_candidate(
    base_range: AddressBlock,
    reserved: &[AddressBlock],
    candidate: AddressBlock,
) -> Result<AddressBlock, AllocationError> {
    if !contains_block(base_range, candidate) {
        return Err(AllocationError::BaseRangeExhausted { base_range });
    }

    let mut all = Vec::with_capacity(reserved.len().saturating_add(1));
    all.extend_from_slice(reserved);
    all.push(candidate);
    if let Err(overlap) = verify_disjoint(&all) {
        let conflicting = if overlap.first == candidate {
            overlap.second
        } else {
            overlap.first
        };
        return Err(AllocationError::InvariantViolation {
            candidate,
            conflicting,
        });
    }

    Ok(candidate)
}

fn sort_descending(reserved: &[AddressBlock]) -> Vec<AddressBlock> {
    let mut descending = reserved.to_vec();
    descending.sort_unstable_by(|a, b| b.cmp(a));
    descending
}
