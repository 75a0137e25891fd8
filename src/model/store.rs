//! Crash-recoverable persistence of ladder row tables.
//!
//! One CSV record per active ladder, keyed by a sha512 hash of
//! `(exchange, symbol, identifier)` so a restarted process can find the
//! record again from the still-open stop order id.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha512};
use tracing::debug;

use crate::error::{BotError, Result};

use super::ladder::LadderRung;
use super::Direction;

#[derive(Debug, Clone)]
pub struct LadderStore {
    dir: PathBuf,
}

impl LadderStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable record name: direction prefix + content hash.
    pub fn file_name(direction: Direction, exchange_symbol: &str, identifier: &str) -> String {
        let prefix = match direction {
            Direction::Long => "bids_",
            Direction::Short => "asks_",
        };
        let keyed = format!("{exchange_symbol}_{identifier}");
        let hash = format!("{:x}", Sha512::digest(keyed.as_bytes()));
        format!("{prefix}{hash}.csv")
    }

    pub fn save(&self, file_name: &str, rows: &[LadderRung]) -> Result<()> {
        let path = self.dir.join(file_name);
        debug!(file = %path.display(), rows = rows.len(), "saving ladder rows");
        let mut writer = csv::Writer::from_path(&path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load(&self, file_name: &str) -> Result<Vec<LadderRung>> {
        let path = self.dir.join(file_name);
        if !path.exists() {
            return Err(BotError::ModelNotFound(file_name.to_string()));
        }
        debug!(file = %path.display(), "restoring ladder rows");
        let mut reader = csv::Reader::from_path(&path)?;
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<LadderRung>, _>>()?;
        Ok(rows)
    }

    pub fn remove(&self, file_name: &str) -> Result<()> {
        let path = self.dir.join(file_name);
        if path.exists() {
            debug!(file = %path.display(), "removing ladder record");
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
