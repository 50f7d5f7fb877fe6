//! End-of-run view of the engine for hosts to display or persist.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::TradingDay;
use crate::engine::feed::BarRejectReason;
use crate::engine::recovery::RecoveryState;
use crate::stream::{StreamSnapshot, TerminalReason};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSummary {
    pub trading_day: TradingDay,
    pub recovery: RecoveryState,
    pub kill_switch_enabled: bool,
    pub timetable_revision: Option<u64>,
    pub streams: Vec<StreamSnapshot>,
    pub bars_accepted: u64,
    pub bar_rejections: BTreeMap<BarRejectReason, u64>,
    pub journal_records: usize,
}

impl EngineSummary {
    pub fn all_done(&self) -> bool {
        self.streams.iter().all(|s| s.state.is_done())
    }

    /// Count of finished streams per terminal reason.
    pub fn outcomes(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for reason in self.streams.iter().filter_map(|s| s.state.terminal_reason()) {
            *out.entry(reason.to_string()).or_insert(0) += 1;
        }
        out
    }

    pub fn terminal_reason(&self, stream_id: &str) -> Option<TerminalReason> {
        self.streams
            .iter()
            .find(|s| s.stream_id.as_str() == stream_id)
            .and_then(|s| s.state.terminal_reason())
    }

    pub fn bars_rejected(&self) -> u64 {
        self.bar_rejections.values().sum()
    }
}
