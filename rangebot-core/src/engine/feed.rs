//! Per-instrument bar admission and feed health.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarRejectReason {
    Malformed,
    WrongTradingDay,
    OutOfOrder,
    Duplicate,
    UnknownInstrument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedStatus {
    Healthy,
    Failed,
}

/// Tracks the last accepted bar per instrument, reported feed failures,
/// and admission counters.
#[derive(Debug, Clone, Default)]
pub struct FeedMonitor {
    last_bar: BTreeMap<String, DateTime<Utc>>,
    status: BTreeMap<String, FeedStatus>,
    /// Instruments with a failure reported since their last accepted bar.
    failed_since_bar: BTreeSet<String>,
    accepted: u64,
    rejected: BTreeMap<BarRejectReason, u64>,
}

impl FeedMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordering check only; does not record anything.
    pub fn check_order(
        &self,
        instrument: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), BarRejectReason> {
        match self.last_bar.get(instrument) {
            Some(last) if timestamp == *last => Err(BarRejectReason::Duplicate),
            Some(last) if timestamp < *last => Err(BarRejectReason::OutOfOrder),
            _ => Ok(()),
        }
    }

    /// Record an accepted bar. Returns whether a feed failure was reported
    /// since the previous bar, which makes the gap before it count.
    pub fn accept(&mut self, instrument: &str, timestamp: DateTime<Utc>) -> bool {
        self.last_bar.insert(instrument.to_string(), timestamp);
        self.accepted += 1;
        self.failed_since_bar.remove(instrument)
    }

    pub fn reject(&mut self, reason: BarRejectReason) {
        *self.rejected.entry(reason).or_insert(0) += 1;
    }

    /// Returns true when the status actually changed.
    pub fn set_status(&mut self, instrument: &str, status: FeedStatus) -> bool {
        if status == FeedStatus::Failed {
            self.failed_since_bar.insert(instrument.to_string());
        }
        let previous = self.status.insert(instrument.to_string(), status);
        previous.unwrap_or(FeedStatus::Healthy) != status
    }

    pub fn status(&self, instrument: &str) -> FeedStatus {
        self.status.get(instrument).copied().unwrap_or(FeedStatus::Healthy)
    }

    pub fn last_bar(&self, instrument: &str) -> Option<DateTime<Utc>> {
        self.last_bar.get(instrument).copied()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejections(&self) -> &BTreeMap<BarRejectReason, u64> {
        &self.rejected
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 14, min, 0).unwrap()
    }

    #[test]
    fn ordering_rejects_duplicates_and_regressions() {
        let mut feed = FeedMonitor::new();
        assert!(feed.check_order("ES", at(0)).is_ok());
        feed.accept("ES", at(5));
        assert_eq!(feed.check_order("ES", at(5)), Err(BarRejectReason::Duplicate));
        assert_eq!(feed.check_order("ES", at(4)), Err(BarRejectReason::OutOfOrder));
        assert!(feed.check_order("ES", at(6)).is_ok());
        assert!(feed.check_order("NQ", at(1)).is_ok(), "instruments are independent");
    }

    #[test]
    fn failure_flag_is_consumed_by_next_bar() {
        let mut feed = FeedMonitor::new();
        assert!(!feed.accept("ES", at(0)));
        assert!(feed.set_status("ES", FeedStatus::Failed));
        assert!(!feed.set_status("ES", FeedStatus::Failed));
        assert!(feed.set_status("ES", FeedStatus::Healthy));
        assert!(feed.accept("ES", at(9)), "failure reported since last bar");
        assert!(!feed.accept("ES", at(10)));
    }

    #[test]
    fn counters() {
        let mut feed = FeedMonitor::new();
        feed.accept("ES", at(0));
        feed.reject(BarRejectReason::Duplicate);
        feed.reject(BarRejectReason::Duplicate);
        feed.reject(BarRejectReason::WrongTradingDay);
        assert_eq!(feed.accepted(), 1);
        assert_eq!(feed.rejected_total(), 3);
        assert_eq!(feed.rejections()[&BarRejectReason::Duplicate], 2);
    }
}
