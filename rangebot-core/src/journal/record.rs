use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BrokerOrderId, Intent, IntentId, StreamId, TradingDay};

/// Lifecycle of one journaled intent. Monotonic: states only move forward,
/// and FILLED / REJECTED / CANCELLED accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalState {
    Submitted,
    Acknowledged,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl JournalState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JournalState::Filled | JournalState::Rejected | JournalState::Cancelled)
    }

    fn rank(self) -> u8 {
        match self {
            JournalState::Submitted => 0,
            JournalState::Acknowledged => 1,
            JournalState::PartiallyFilled => 2,
            JournalState::Filled | JournalState::Rejected | JournalState::Cancelled => 3,
        }
    }

    /// Whether `self -> next` is a legal forward move. Repeating
    /// PARTIALLY_FILLED is allowed (further partial fills).
    pub fn can_transition_to(self, next: JournalState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JournalState::PartiallyFilled && self == JournalState::PartiallyFilled {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for JournalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JournalState::Submitted => "SUBMITTED",
            JournalState::Acknowledged => "ACKNOWLEDGED",
            JournalState::PartiallyFilled => "PARTIALLY_FILLED",
            JournalState::Filled => "FILLED",
            JournalState::Rejected => "REJECTED",
            JournalState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JournalKey {
    pub trading_day: TradingDay,
    pub stream_id: StreamId,
    pub intent_id: IntentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub key: JournalKey,
    /// The intent as first submitted; never overwritten.
    pub intent: Intent,
    pub state: JournalState,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<BrokerOrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<f64>,
    #[serde(default)]
    pub filled_quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl JournalRecord {
    pub fn submitted(intent: Intent, now: DateTime<Utc>) -> Self {
        let key = JournalKey {
            trading_day: intent.trading_day,
            stream_id: intent.stream_id.clone(),
            intent_id: intent.intent_id(),
        };
        Self {
            key,
            intent,
            state: JournalState::Submitted,
            submitted_at: now,
            updated_at: now,
            broker_order_id: None,
            fill_price: None,
            filled_quantity: 0,
            rejection_reason: None,
        }
    }
}

/// Terminal outcomes the fill-callback path records.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Filled { price: f64, quantity: u32 },
    Rejected { reason: String },
    Cancelled,
}

impl TerminalOutcome {
    pub fn state(&self) -> JournalState {
        match self {
            TerminalOutcome::Filled { .. } => JournalState::Filled,
            TerminalOutcome::Rejected { .. } => JournalState::Rejected,
            TerminalOutcome::Cancelled => JournalState::Cancelled,
        }
    }
}

/// Persisted range-lock idempotency entry: one per (trading day, stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeLockRecord {
    pub trading_day: TradingDay,
    pub stream_id: StreamId,
    pub range_high: f64,
    pub range_low: f64,
    pub breakout_long: f64,
    pub breakout_short: f64,
    pub close_at_lock: f64,
    pub bar_count: usize,
    pub locked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_monotonic() {
        use JournalState::*;
        assert!(Submitted.can_transition_to(Acknowledged));
        assert!(Submitted.can_transition_to(Filled));
        assert!(Acknowledged.can_transition_to(PartiallyFilled));
        assert!(PartiallyFilled.can_transition_to(PartiallyFilled));
        assert!(PartiallyFilled.can_transition_to(Filled));
        assert!(Acknowledged.can_transition_to(Cancelled));
        assert!(!Acknowledged.can_transition_to(Submitted));
        assert!(!PartiallyFilled.can_transition_to(Acknowledged));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        use JournalState::*;
        for terminal in [Filled, Rejected, Cancelled] {
            for next in [Submitted, Acknowledged, PartiallyFilled, Filled, Rejected, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }
}
