//! Historical bar source over CSV files, one per instrument.
//!
//! Files live at `<dir>/<INSTRUMENT>.csv` with a header row:
//! `timestamp,open,high,low,close,volume`. Timestamps are RFC 3339 bar
//! open times (`2025-12-01T08:00:00Z`); volume may be empty. Files are read
//! once and cached.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use rangebot_core::adapter::{BarProvider, BarSourceError};
use rangebot_core::domain::Bar;

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<u64>,
}

#[derive(Debug)]
pub struct CsvBarSource {
    dir: PathBuf,
    cache: Mutex<BTreeMap<String, Vec<Bar>>>,
}

impl CsvBarSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), cache: Mutex::new(BTreeMap::new()) }
    }

    pub fn path_for(&self, instrument: &str) -> PathBuf {
        self.dir.join(format!("{instrument}.csv"))
    }

    /// Every bar for an instrument, sorted by timestamp.
    pub fn bars(&self, instrument: &str) -> Result<Vec<Bar>, BarSourceError> {
        if let Some(bars) = self.cache.lock().get(instrument) {
            return Ok(bars.clone());
        }
        let path = self.path_for(instrument);
        if !path.exists() {
            return Err(BarSourceError::UnknownInstrument(instrument.to_string()));
        }
        let bars = read_bars(&path)?;
        debug!(instrument, bars = bars.len(), path = %path.display(), "bar file loaded");
        self.cache.lock().insert(instrument.to_string(), bars.clone());
        Ok(bars)
    }
}

impl BarProvider for CsvBarSource {
    fn get_bars(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BarSourceError> {
        let bars = self.bars(instrument)?;
        Ok(bars.into_iter().filter(|b| b.timestamp >= start && b.timestamp < end).collect())
    }
}

/// Parse a bar file. Any unreadable row fails the whole file.
pub fn read_bars(path: &Path) -> Result<Vec<Bar>, BarSourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| BarSourceError::Unavailable(format!("{}: {e}", path.display())))?;

    let mut bars = Vec::new();
    for (i, row) in reader.deserialize::<BarRow>().enumerate() {
        let row = row.map_err(|e| {
            BarSourceError::Malformed(format!("{} row {}: {e}", path.display(), i + 1))
        })?;
        let bar = Bar::new(row.timestamp, row.open, row.high, row.low, row.close);
        bars.push(match row.volume {
            Some(v) => bar.with_volume(v),
            None => bar,
        });
    }
    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}
