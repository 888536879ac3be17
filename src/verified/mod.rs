//! Pure functions behind the reservation protocol.
//!
//! Everything in this module is deterministic and side-effect free: no I/O,
//! no clocks, no logging. The imperative shell ([`crate::coordinator`] and
//! [`crate::reservator`]) feeds these functions immutable snapshots and acts
//! on their results.
//!
//! # Module Organization
//!
//! - [`block`]: Alignment, containment, overlap, subnet stepping
//! - [`allocator`]: Gap-filling allocation over a reservation snapshot
//! - [`cas`]: Version preconditions and retry backoff
//!
//! # Tiger Style
//!
//! - Checked or widened arithmetic (no silent wraparound)
//! - Explicit integer types (u32 addresses, u8 prefixes, u64 sizes)
//! - Bounded loops over bounded inputs

pub mod allocator;
pub mod block;
pub mod cas;

pub use allocator::allocate;
pub use block::Overlap;
pub use block::contains;
pub use block::next_subnet;
pub use block::nth_subnet;
pub use block::overlaps;
pub use block::verify_disjoint;
pub use cas::compute_retry_delay;
pub use cas::is_precondition_met;
pub use cas::next_generation;
pub use cas::should_retry;
