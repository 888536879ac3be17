//! Pure block arithmetic.
//!
//! Addresses are `u32`; anything that can reach 2^32 (sizes, one-past-the-end
//! positions) is computed in `u64` so that stepping past the top of the
//! address space is detected rather than wrapped.

use std::fmt;

use crate::block::AddressBlock;
use crate::constants::ADDRESS_BITS;
use crate::error::AllocationError;

// ============================================================================
// Masks and Sizes
// ============================================================================

/// Network mask for a prefix length.
///
/// `prefix_length` must be at most 32.
#[inline]
pub fn prefix_mask(prefix_length: u8) -> u32 {
    debug_assert!(prefix_length <= ADDRESS_BITS, "prefix length {prefix_length} exceeds {ADDRESS_BITS}");
    if prefix_length == 0 {
        0
    } else {
        u32::MAX << (ADDRESS_BITS - prefix_length)
    }
}

/// Number of addresses in a block of the given prefix length.
#[inline]
pub fn block_size(prefix_length: u8) -> u64 {
    debug_assert!(prefix_length <= ADDRESS_BITS, "prefix length {prefix_length} exceeds {ADDRESS_BITS}");
    1u64 << (ADDRESS_BITS - prefix_length)
}

/// Clear the host bits of `address`.
#[inline]
pub fn align_down(address: u32, prefix_length: u8) -> u32 {
    address & prefix_mask(prefix_length)
}

/// Last address of an aligned block.
#[inline]
pub fn block_last_address(base: u32, prefix_length: u8) -> u32 {
    base | !prefix_mask(prefix_length)
}

// ============================================================================
// Relations
// ============================================================================

/// Check if `address` falls inside `outer`.
#[inline]
pub fn contains(outer: AddressBlock, address: u32) -> bool {
    align_down(address, outer.prefix_length()) == outer.base()
}

/// Check if `inner` lies entirely inside `outer`.
#[inline]
pub fn contains_block(outer: AddressBlock, inner: AddressBlock) -> bool {
    inner.prefix_length() >= outer.prefix_length() && contains(outer, inner.base())
}

/// Check if two blocks share at least one address.
#[inline]
pub fn overlaps(a: AddressBlock, b: AddressBlock) -> bool {
    a.base() <= b.last() && b.base() <= a.last()
}

// ============================================================================
// Stepping
// ============================================================================

/// The `index`-th block of prefix `size` inside `parent`, in ascending order.
///
/// # Errors
///
/// `InvalidInput` if `size` is shorter than the parent's prefix, longer than
/// 32, or `index` is past the last such block.
pub fn nth_subnet(parent: AddressBlock, size: u8, index: u64) -> Result<AddressBlock, AllocationError> {
    if size > ADDRESS_BITS {
        return Err(AllocationError::InvalidInput {
            reason: format!("prefix length {size} exceeds {ADDRESS_BITS}"),
        });
    }
    if size < parent.prefix_length() {
        return Err(AllocationError::InvalidInput {
            reason: format!("prefix length /{size} is larger than base range {parent}"),
        });
    }

    let count = 1u64 << (size - parent.prefix_length());
    if index >= count {
        return Err(AllocationError::InvalidInput {
            reason: format!("subnet index {index} is out of range for /{size} blocks of {parent}"),
        });
    }

    let offset = index.saturating_mul(block_size(size));
    let base = u64::from(parent.base()).saturating_add(offset);
    let base = u32::try_from(base).map_err(|_| AllocationError::InvalidInput {
        reason: format!("subnet index {index} is out of range for /{size} blocks of {parent}"),
    })?;
    AddressBlock::new(base, size)
}

/// First aligned block of prefix `size` that starts after `anchor` ends.
///
/// For a block no larger than the anchor this starts right after the anchor.
/// For a larger block it is the one following the `size`-block holding the
/// anchor's last address.
///
/// # Errors
///
/// `MaximumAddressExhausted` if the result would wrap past 255.255.255.255,
/// `InvalidInput` if `size` exceeds 32.
pub fn next_subnet(anchor: AddressBlock, size: u8) -> Result<AddressBlock, AllocationError> {
    if size > ADDRESS_BITS {
        return Err(AllocationError::InvalidInput {
            reason: format!("prefix length {size} exceeds {ADDRESS_BITS}"),
        });
    }

    let enclosing = u64::from(align_down(anchor.last(), size));
    let next = enclosing + block_size(size);
    match u32::try_from(next) {
        Ok(base) => AddressBlock::new(base, size),
        Err(_) => Err(AllocationError::MaximumAddressExhausted { anchor }),
    }
}

// ============================================================================
// Disjointness
// ============================================================================

/// Two blocks that share addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    /// The lower of the two blocks.
    pub first: AddressBlock,
    /// The block that starts inside `first`.
    pub second: AddressBlock,
}

impl fmt::Display for Overlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} overlaps {}", self.first, self.second)
    }
}

/// Verify that no two blocks share an address.
///
/// Sorting by base and checking adjacent pairs is exact for aligned
/// power-of-two blocks: if any pair overlaps, some adjacent pair does.
pub fn verify_disjoint(blocks: &[AddressBlock]) -> Result<(), Overlap> {
    let mut sorted = blocks.to_vec();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        if overlaps(pair[0], pair[1]) {
            return Err(Overlap {
                first: pair[0],
                second: pair[1],
            });
        }
    }
    Ok(())
}
