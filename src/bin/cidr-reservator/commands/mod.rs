//! Reservation commands.
//!
//! Every command works on one base range; its reservation table lives under
//! a key derived from the range notation.

mod key;
mod reservation;

use std::sync::Arc;

use cidr_reservator::AddressBlock;
use cidr_reservator::CidrReservator;
use cidr_reservator::RedbReservationStore;
use cidr_reservator::RetryConfig;
use clap::Args;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

pub use self::key::KeyArgs;
pub use self::reservation::AllocateArgs;
pub use self::reservation::ListArgs;
pub use self::reservation::ReleaseArgs;
pub use self::reservation::RenameArgs;
pub use self::reservation::ResizeArgs;
pub use self::reservation::ShowArgs;

/// Reservation operations.
#[derive(Subcommand)]
pub enum ReservationCommand {
    /// Reserve the next free block of a given size under a name.
    Allocate(AllocateArgs),

    /// Release the block held by a name.
    Release(ReleaseArgs),

    /// Show the block held by a name.
    Show(ShowArgs),

    /// List every reservation in a base range.
    List(ListArgs),

    /// Move a reservation to a new name, keeping its block.
    Rename(RenameArgs),

    /// Give a reservation a block of a different size.
    Resize(ResizeArgs),

    /// Print the storage key of a base range's reservation table.
    Key(KeyArgs),
}

/// The base range an operation works on.
#[derive(Args, Clone)]
pub struct RangeArgs {
    /// Parent range every reservation is carved from (e.g. 10.116.0.0/14).
    #[arg(long, env = "CIDR_RESERVATOR_BASE_RANGE")]
    pub base_range: AddressBlock,
}

/// Shared state for commands that touch the store.
pub struct CommandContext {
    pub store: Arc<RedbReservationStore>,
    pub retry: RetryConfig,
    pub cancel: CancellationToken,
}

impl CommandContext {
    /// A reservator for `base_range` wired to the shared store and cancel token.
    pub fn reservator(&self, base_range: AddressBlock) -> CidrReservator<RedbReservationStore> {
        CidrReservator::new(self.store.clone(), base_range, self.retry.clone()).with_cancellation(self.cancel.clone())
    }
}

impl ReservationCommand {
    /// Execute the reservation command.
    pub async fn run(self, context: &CommandContext, json: bool) -> anyhow::Result<()> {
        match self {
            ReservationCommand::Allocate(args) => reservation::allocate(context, args, json).await,
            ReservationCommand::Release(args) => reservation::release(context, args, json).await,
            ReservationCommand::Show(args) => reservation::show(context, args, json).await,
            ReservationCommand::List(args) => reservation::list(context, args, json).await,
            ReservationCommand::Rename(args) => reservation::rename(context, args, json).await,
            ReservationCommand::Resize(args) => reservation::resize(context, args, json).await,
            ReservationCommand::Key(args) => args.run(json),
        }
    }
}
