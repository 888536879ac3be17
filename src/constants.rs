//! Constants for CIDR reservations.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.

// ============================================================================
// Address Space
// ============================================================================

/// Width of the address space in bits (IPv4).
pub const ADDRESS_BITS: u8 = 32;

// ============================================================================
// Retry Policy
// ============================================================================

/// Default number of read-modify-write attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default backoff unit in milliseconds.
///
/// The sleep before attempt `n + 1` is `2 * n` units.
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1000;

/// Upper bound on the configurable attempt budget.
///
/// Tiger Style: a bounded retry budget keeps a contended pool from pinning a
/// caller forever.
pub const MAX_RESERVATION_ATTEMPTS_LIMIT: u32 = 32;

// ============================================================================
// Table Limits
// ============================================================================

/// Maximum number of reservations a single table may hold.
///
/// Tables larger than this are rejected before allocation runs.
pub const MAX_RESERVATIONS_PER_TABLE: u32 = 65_536;

// ============================================================================
// Storage Keys
// ============================================================================

/// Prefix of every reservation object key.
pub const STORAGE_KEY_PREFIX: &str = "cidr-reservation/baseCidr-";

/// Suffix of every reservation object key.
pub const STORAGE_KEY_SUFFIX: &str = ".json";

// ============================================================================
// Compile-time checks
// ============================================================================

const _: () = assert!(DEFAULT_MAX_ATTEMPTS > 0);
const _: () = assert!(DEFAULT_MAX_ATTEMPTS <= MAX_RESERVATION_ATTEMPTS_LIMIT);
const _: () = assert!(DEFAULT_BACKOFF_UNIT_MS > 0);
const _: () = assert!(MAX_RESERVATIONS_PER_TABLE > 0);
