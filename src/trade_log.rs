//! CSV trade history logging.
//!
//! Appends one record per finished trade for historical tracking and
//! analysis. Creates the file with headers on first use.

use std::fs::OpenOptions;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::model::Direction;

/// Finished-trade record for CSV logging.
#[derive(Debug, Serialize)]
pub struct TradeRecord {
    /// ISO 8601 timestamp of trade completion.
    pub timestamp: String,
    pub exchange_id: String,
    pub symbol: String,
    /// Direction of the closed position.
    pub direction: String,
    /// Position size at close.
    pub size: f64,
    /// Average entry price of the closed position.
    pub entry_price: f64,
    /// What closed the trade: take_profit, stop_loss or unknown.
    pub exit_kind: String,
    pub realized_pnl: f64,
    /// Running total since the bot started.
    pub cumulative_pnl: f64,
}

impl TradeRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        exchange_id: String,
        symbol: String,
        direction: Direction,
        size: f64,
        entry_price: f64,
        exit_kind: &str,
        realized_pnl: f64,
        cumulative_pnl: f64,
    ) -> Self {
        Self {
            timestamp: timestamp.to_rfc3339(),
            exchange_id,
            symbol,
            direction: direction.as_str().to_string(),
            size,
            entry_price,
            exit_kind: exit_kind.to_string(),
            realized_pnl,
            cumulative_pnl,
        }
    }
}

/// Append a trade record to the CSV file, writing headers only when the file
/// is new.
pub fn log_trade(file_path: &str, record: &TradeRecord) -> Result<()> {
    let path = Path::new(file_path);
    let file_exists = path.exists();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}
