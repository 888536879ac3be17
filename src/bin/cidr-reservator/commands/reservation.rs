//! Allocate, release and inspect reservations.

use anyhow::Context;
use anyhow::Result;
use clap::Args;

use super::CommandContext;
use super::RangeArgs;
use crate::output::ReservationOutput;
use crate::output::TableOutput;
use crate::output::print_output;

#[derive(Args)]
pub struct AllocateArgs {
    /// Reservation name.
    pub name: String,

    #[command(flatten)]
    pub range: RangeArgs,

    /// Size of the block to reserve, as a prefix length (e.g. 22).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=32))]
    pub prefix_length: u8,
}

#[derive(Args)]
pub struct ReleaseArgs {
    /// Reservation name.
    pub name: String,

    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Reservation name.
    pub name: String,

    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(Args)]
pub struct RenameArgs {
    /// Current reservation name.
    pub from: String,

    /// New reservation name.
    pub to: String,

    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(Args)]
pub struct ResizeArgs {
    /// Reservation name.
    pub name: String,

    #[command(flatten)]
    pub range: RangeArgs,

    /// New block size, as a prefix length.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=32))]
    pub prefix_length: u8,
}

pub(super) async fn allocate(context: &CommandContext, args: AllocateArgs, json: bool) -> Result<()> {
    let reservator = context.reservator(args.range.base_range);
    let block = reservator
        .allocate(&args.name, args.prefix_length)
        .await
        .with_context(|| format!("failed to allocate /{} for '{}'", args.prefix_length, args.name))?;

    print_output(
        &ReservationOutput {
            operation: "allocate",
            name: args.name,
            block: Some(block),
        },
        json,
    );
    Ok(())
}

pub(super) async fn release(context: &CommandContext, args: ReleaseArgs, json: bool) -> Result<()> {
    let reservator = context.reservator(args.range.base_range);
    let block = reservator
        .release(&args.name)
        .await
        .with_context(|| format!("failed to release '{}'", args.name))?;

    print_output(
        &ReservationOutput {
            operation: "release",
            name: args.name,
            block,
        },
        json,
    );
    Ok(())
}

pub(super) async fn show(context: &CommandContext, args: ShowArgs, json: bool) -> Result<()> {
    let reservator = context.reservator(args.range.base_range);
    let Some(block) = reservator.lookup(&args.name).await? else {
        anyhow::bail!("reservation '{}' does not exist in {}", args.name, args.range.base_range);
    };

    print_output(
        &ReservationOutput {
            operation: "show",
            name: args.name,
            block: Some(block),
        },
        json,
    );
    Ok(())
}

pub(super) async fn list(context: &CommandContext, args: ListArgs, json: bool) -> Result<()> {
    let reservator = context.reservator(args.range.base_range);
    let table = reservator.list().await?;

    print_output(
        &TableOutput {
            base_range: reservator.base_range(),
            key: reservator.storage_key().to_string(),
            table,
        },
        json,
    );
    Ok(())
}

pub(super) async fn rename(context: &CommandContext, args: RenameArgs, json: bool) -> Result<()> {
    let reservator = context.reservator(args.range.base_range);
    let block = reservator
        .rename(&args.from, &args.to)
        .await
        .with_context(|| format!("failed to rename '{}' to '{}'", args.from, args.to))?;

    print_output(
        &ReservationOutput {
            operation: "rename",
            name: args.to,
            block: Some(block),
        },
        json,
    );
    Ok(())
}

pub(super) async fn resize(context: &CommandContext, args: ResizeArgs, json: bool) -> Result<()> {
    let reservator = context.reservator(args.range.base_range);
    let block = reservator
        .resize(&args.name, args.prefix_length)
        .await
        .with_context(|| format!("failed to resize '{}' to /{}", args.name, args.prefix_length))?;

    print_output(
        &ReservationOutput {
            operation: "resize",
            name: args.name,
            block: Some(block),
        },
        json,
    );
    Ok(())
}
