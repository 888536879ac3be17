//! Race-safe CIDR subnet reservations.
//!
//! Hands out non-overlapping IPv4 subnets, by name, from one fixed base range.
//! The reservation table lives in a shared versioned object so that
//! independent callers, in the same process or on different machines, never
//! receive overlapping blocks and never need an external lock.
//!
//! The crate is split into a functional core and an imperative shell:
//!
//! - [`verified`] - pure block arithmetic and the gap-filling allocator
//! - [`ReservationStore`] - versioned reads and conditional writes
//! - [`ReservationCoordinator`] - read, mutate, conditional write, retry on conflict
//! - [`CidrReservator`] - allocate / release / lookup / list / rename / resize
//!
//! ## Example
//!
//! ```ignore
//! use cidr_reservator::{CidrReservator, RedbReservationStore, RetryConfig};
//!
//! let store = Arc::new(RedbReservationStore::new("./cidr-reservations.redb")?);
//! let reservator = CidrReservator::new(store, "10.116.0.0/14".parse()?, RetryConfig::default());
//!
//! let block = reservator.allocate("build-cluster", 22).await?;
//! println!("reserved {block}");
//!
//! reservator.release("build-cluster").await?;
//! ```

mod block;
pub mod config;
pub mod constants;
mod coordinator;
mod error;
mod reservator;
pub mod store;
mod table;
pub mod verified;

pub use block::AddressBlock;
pub use config::ConfigError;
pub use config::ReservatorConfig;
pub use config::load_config;
pub use coordinator::ReservationCoordinator;
pub use coordinator::RetryConfig;
pub use error::AllocationError;
pub use error::ReservationError;
pub use error::StoreError;
pub use reservator::CidrReservator;
pub use store::DeterministicReservationStore;
pub use store::InjectedFault;
pub use store::RedbReservationStore;
pub use store::ReservationStore;
pub use store::VersionToken;
pub use store::VersionedTable;
pub use store::WriteOutcome;
pub use table::ReservationTable;
pub use table::storage_key;
