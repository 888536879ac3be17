//! Aligned IPv4 address blocks.
//!
//! An [`AddressBlock`] is a CIDR block whose base address has every host bit
//! cleared. All arithmetic lives in [`crate::verified::block`]; this type
//! only guards construction and provides the textual notation.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::ADDRESS_BITS;
use crate::error::AllocationError;
use crate::verified;

/// An aligned power-of-two range of IPv4 addresses.
///
/// Ordering is by base address, then by prefix length, which is the address
/// order the allocator scans in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressBlock {
    base: u32,
    prefix_length: u8,
}

impl AddressBlock {
    /// Create a block from an aligned base address.
    ///
    /// Fails with `InvalidInput` if the prefix length exceeds 32 or the base
    /// has host bits set.
    pub fn new(base: u32, prefix_length: u8) -> Result<Self, AllocationError> {
        check_prefix_length(prefix_length)?;
        if verified::block::align_down(base, prefix_length) != base {
            return Err(AllocationError::InvalidInput {
                reason: format!(
                    "{}/{} has host bits set",
                    Ipv4Addr::from(base),
                    prefix_length
                ),
            });
        }
        Ok(Self { base, prefix_length })
    }

    /// The block of the given size that contains `address`.
    pub fn containing(address: Ipv4Addr, prefix_length: u8) -> Result<Self, AllocationError> {
        check_prefix_length(prefix_length)?;
        Ok(Self {
            base: verified::block::align_down(u32::from(address), prefix_length),
            prefix_length,
        })
    }

    /// First address as an integer.
    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Number of leading network bits.
    #[inline]
    pub fn prefix_length(&self) -> u8 {
        self.prefix_length
    }

    /// First address of the block.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    /// Last address of the block as an integer.
    #[inline]
    pub fn last(&self) -> u32 {
        verified::block::block_last_address(self.base, self.prefix_length)
    }

    /// Number of addresses in the block.
    #[inline]
    pub fn size(&self) -> u64 {
        verified::block::block_size(self.prefix_length)
    }

    /// Whether `address` falls inside this block.
    pub fn contains_address(&self, address: u32) -> bool {
        verified::block::contains(*self, address)
    }

    /// Whether `other` lies entirely inside this block.
    pub fn contains_block(&self, other: &AddressBlock) -> bool {
        verified::block::contains_block(*self, *other)
    }

    /// Whether the two blocks share at least one address.
    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        verified::block::overlaps(*self, *other)
    }
}

fn check_prefix_length(prefix_length: u8) -> Result<(), AllocationError> {
    if prefix_length > ADDRESS_BITS {
        return Err(AllocationError::InvalidInput {
            reason: format!("prefix length {prefix_length} exceeds {ADDRESS_BITS}"),
        });
    }
    Ok(())
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_length)
    }
}

/// Parses `a.b.c.d/len`. Host bits are cleared, so `10.0.0.9/24` reads as
/// `10.0.0.0/24`.
impl FromStr for AddressBlock {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Net = s.trim().parse().map_err(|e| AllocationError::InvalidInput {
            reason: format!("invalid CIDR notation '{s}': {e}"),
        })?;
        Self::containing(net.addr(), net.prefix_len())
    }
}

impl TryFrom<String> for AddressBlock {
    type Error = AllocationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddressBlock> for String {
    fn from(block: AddressBlock) -> Self {
        block.to_string()
    }
}
