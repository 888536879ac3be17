//! Storage key derivation command.

use anyhow::Result;
use cidr_reservator::storage_key;
use clap::Args;

use super::RangeArgs;
use crate::output::KeyOutput;
use crate::output::print_output;

#[derive(Args)]
pub struct KeyArgs {
    #[command(flatten)]
    pub range: RangeArgs,
}

impl KeyArgs {
    /// Print the key; needs no store.
    pub fn run(self, json: bool) -> Result<()> {
        let output = KeyOutput {
            base_range: self.range.base_range,
            key: storage_key(self.range.base_range),
        };
        print_output(&output, json);
        Ok(())
    }
}
