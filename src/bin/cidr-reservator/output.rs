//! Output formatting for CLI responses.
//!
//! Supports both human-readable and JSON output formats for
//! integration with scripts and other tools.

use cidr_reservator::AddressBlock;
use cidr_reservator::ReservationTable;

/// Trait for types that can be output in multiple formats.
pub trait Outputable {
    /// Convert to JSON value for structured output.
    fn to_json(&self) -> serde_json::Value;

    /// Convert to human-readable string.
    fn to_human(&self) -> String;
}

/// Print a value in the appropriate format.
pub fn print_output<T: Outputable>(value: &T, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&value.to_json())
                .unwrap_or_else(|e| { format!("{{\"error\": \"failed to serialize: {}\"}}", e) })
        );
    } else {
        println!("{}", value.to_human());
    }
}

/// Result of a single-reservation operation.
pub struct ReservationOutput {
    pub operation: &'static str,
    pub name: String,
    /// `None` when a release found nothing to free.
    pub block: Option<AddressBlock>,
}

impl Outputable for ReservationOutput {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "operation": self.operation,
            "name": self.name,
            "block": self.block.map(|block| block.to_string()),
        })
    }

    fn to_human(&self) -> String {
        match (self.operation, self.block) {
            ("release", Some(block)) => format!("Released {} ({})", self.name, block),
            ("release", None) => format!("No reservation named {}", self.name),
            (_, Some(block)) => format!("{} {}", self.name, block),
            (operation, None) => format!("{} {}: no block", operation, self.name),
        }
    }
}

/// All reservations of one base range.
pub struct TableOutput {
    pub base_range: AddressBlock,
    pub key: String,
    pub table: ReservationTable,
}

impl Outputable for TableOutput {
    fn to_json(&self) -> serde_json::Value {
        let subnets: serde_json::Map<String, serde_json::Value> = self
            .table
            .iter()
            .map(|(name, block)| (name.to_string(), serde_json::Value::String(block.to_string())))
            .collect();

        serde_json::json!({
            "base_range": self.base_range.to_string(),
            "key": self.key,
            "count": self.table.len(),
            "subnets": subnets,
        })
    }

    fn to_human(&self) -> String {
        if self.table.is_empty() {
            return format!("No reservations in {}", self.base_range);
        }

        let mut rows: Vec<(&str, AddressBlock)> = self.table.iter().collect();
        rows.sort_by_key(|(_, block)| *block);

        let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0).max(4);
        let mut output = format!("Reservations in {} ({})\n", self.base_range, rows.len());
        output.push_str(&format!("{:width$}  BLOCK\n", "NAME", width = width));
        for (name, block) in rows {
            output.push_str(&format!("{:width$}  {}\n", name, block, width = width));
        }
        output.pop();
        output
    }
}

/// Storage key of a base range.
pub struct KeyOutput {
    pub base_range: AddressBlock,
    pub key: String,
}

impl Outputable for KeyOutput {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "base_range": self.base_range.to_string(),
            "key": self.key,
        })
    }

    fn to_human(&self) -> String {
        self.key.clone()
    }
}
