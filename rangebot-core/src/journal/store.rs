//! Durable storage behind the journal.
//!
//! The journal keeps its index in memory and writes every change through a
//! [`JournalStore`]. A store is an append-only log per trading day; on load,
//! later entries for the same key supersede earlier ones.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::domain::TradingDay;

use super::record::{JournalRecord, RangeLockRecord};
use super::JournalError;

/// Everything persisted for one trading day, in append order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalSnapshot {
    pub records: Vec<JournalRecord>,
    pub range_locks: Vec<RangeLockRecord>,
}

pub trait JournalStore: Send + Sync {
    fn load(&self, day: TradingDay) -> Result<JournalSnapshot, JournalError>;

    fn append_record(&self, record: &JournalRecord) -> Result<(), JournalError>;

    fn append_range_lock(&self, lock: &RangeLockRecord) -> Result<(), JournalError>;

    /// Move a finished day out of the active set. Loading an archived day
    /// afterwards returns an empty snapshot.
    fn archive(&self, day: TradingDay) -> Result<(), JournalError>;
}

/// In-process store. Survives engine restarts when the same instance is
/// shared, which is how restart behaviour is exercised in tests.
#[derive(Debug, Default)]
pub struct MemoryJournalStore {
    active: Mutex<BTreeMap<TradingDay, JournalSnapshot>>,
    archived: Mutex<BTreeMap<TradingDay, JournalSnapshot>>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of appended record lines for a day (every update is a line).
    pub fn record_lines(&self, day: TradingDay) -> usize {
        self.active.lock().get(&day).map_or(0, |s| s.records.len())
    }

    pub fn archived_days(&self) -> Vec<TradingDay> {
        self.archived.lock().keys().copied().collect()
    }
}

impl JournalStore for MemoryJournalStore {
    fn load(&self, day: TradingDay) -> Result<JournalSnapshot, JournalError> {
        Ok(self.active.lock().get(&day).cloned().unwrap_or_default())
    }

    fn append_record(&self, record: &JournalRecord) -> Result<(), JournalError> {
        self.active.lock().entry(record.key.trading_day).or_default().records.push(record.clone());
        Ok(())
    }

    fn append_range_lock(&self, lock: &RangeLockRecord) -> Result<(), JournalError> {
        self.active.lock().entry(lock.trading_day).or_default().range_locks.push(lock.clone());
        Ok(())
    }

    fn archive(&self, day: TradingDay) -> Result<(), JournalError> {
        let snapshot = self.active.lock().remove(&day).unwrap_or_default();
        self.archived.lock().insert(day, snapshot);
        Ok(())
    }
}
