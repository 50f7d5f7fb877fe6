//! Structured event stream exposed to the telemetry sink.
//!
//! Every event carries the trading day and, where applicable, the stream id
//! and intent id, so an external reader can reconstruct what happened and
//! why without replaying bars. Each emitted event is mirrored to `tracing`
//! at its severity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::adapter::ConnectionStatus;
use crate::domain::{BrokerOrderId, Direction, IntentId, OrderRole, StreamId, TradingDay};
use crate::engine::recovery::RecoveryState;
use crate::engine::{BarRejectReason, FeedStatus};
use crate::journal::JournalState;
use crate::risk::GateKind;
use crate::stream::{StreamState, TerminalReason};
use crate::time::LocalTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotEvent {
    pub at: DateTime<Utc>,
    pub trading_day: TradingDay,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<StreamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<IntentId>,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl RobotEvent {
    pub fn new(
        trading_day: TradingDay,
        at: DateTime<Utc>,
        severity: Severity,
        kind: EventKind,
    ) -> Self {
        Self { at, trading_day, stream_id: None, intent_id: None, severity, kind }
    }

    pub fn for_stream(mut self, stream_id: &StreamId) -> Self {
        self.stream_id = Some(stream_id.clone());
        self
    }

    pub fn with_intent(mut self, intent_id: &IntentId) -> Self {
        self.intent_id = Some(intent_id.clone());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TradingDayLocked { timezone: String },
    TimetableAccepted { revision: u64, accepted: usize, rejected: usize },
    TimetableRejected { reason: String },
    DirectiveRejected { reason: String },
    StreamCreated { instrument: String, session_id: String, decision_time: LocalTime },
    StreamRestored { state: StreamState },
    StateTransition { from: StreamState, to: StreamState },
    RangeLocked {
        range_high: f64,
        range_low: f64,
        range_size: f64,
        breakout_long: f64,
        breakout_short: f64,
        close_at_lock: f64,
        bar_count: usize,
    },
    RangeInvalidated { reason: String },
    BreakoutDetected { direction: Direction, price: f64, immediate: bool },
    RiskGateDenied { role: OrderRole, gate: GateKind, reason: String },
    IntentSubmitted { role: OrderRole, broker_order_id: BrokerOrderId },
    ExecutionSkippedDuplicate { role: OrderRole, existing_state: JournalState },
    OrderAcknowledged { broker_order_id: BrokerOrderId },
    OrderPartiallyFilled { price: f64, quantity: u32 },
    OrderFilled { role: OrderRole, price: f64, quantity: u32 },
    OrderRejected { role: OrderRole, reason: String },
    OrderCancelled { role: OrderRole },
    BreakEvenTriggered { new_stop: f64 },
    ExitSignalled { role: OrderRole, price: f64 },
    ParityDivergence { expected: OrderRole, actual: OrderRole },
    StreamTerminated { reason: TerminalReason, detail: Option<String> },
    TimetableUpdateApplied { decision_time: LocalTime, enabled: bool },
    TimetableUpdateIgnored { reason: String },
    BarRejected { instrument: String, timestamp: DateTime<Utc>, reason: BarRejectReason },
    UnknownExecutionUpdate { detail: String },
    /// A fill for an intent the journal already holds as rejected or cancelled.
    LateFill { role: OrderRole, price: f64, quantity: u32, journaled: JournalState },
    ConnectionStatusChanged { status: ConnectionStatus },
    RecoveryStateChanged { from: RecoveryState, to: RecoveryState, detail: Option<String> },
    FeedStatusChanged { instrument: String, status: FeedStatus },
    KillSwitchChanged { enabled: bool },
    LiveArmed,
    IdempotencyViolation { detail: String },
    StreamFault { message: String },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TradingDayLocked { .. } => "TRADING_DAY_LOCKED",
            EventKind::TimetableAccepted { .. } => "TIMETABLE_ACCEPTED",
            EventKind::TimetableRejected { .. } => "TIMETABLE_REJECTED",
            EventKind::DirectiveRejected { .. } => "DIRECTIVE_REJECTED",
            EventKind::StreamCreated { .. } => "STREAM_CREATED",
            EventKind::StreamRestored { .. } => "STREAM_RESTORED",
            EventKind::StateTransition { .. } => "STATE_TRANSITION",
            EventKind::RangeLocked { .. } => "RANGE_LOCKED",
            EventKind::RangeInvalidated { .. } => "RANGE_INVALIDATED",
            EventKind::BreakoutDetected { .. } => "BREAKOUT_DETECTED",
            EventKind::RiskGateDenied { .. } => "RISK_GATE_DENIED",
            EventKind::IntentSubmitted { .. } => "INTENT_SUBMITTED",
            EventKind::ExecutionSkippedDuplicate { .. } => "EXECUTION_SKIPPED_DUPLICATE",
            EventKind::OrderAcknowledged { .. } => "ORDER_ACKNOWLEDGED",
            EventKind::OrderPartiallyFilled { .. } => "ORDER_PARTIALLY_FILLED",
            EventKind::OrderFilled { .. } => "ORDER_FILLED",
            EventKind::OrderRejected { .. } => "ORDER_REJECTED",
            EventKind::OrderCancelled { .. } => "ORDER_CANCELLED",
            EventKind::BreakEvenTriggered { .. } => "BREAK_EVEN_TRIGGERED",
            EventKind::ExitSignalled { .. } => "EXIT_SIGNALLED",
            EventKind::ParityDivergence { .. } => "PARITY_DIVERGENCE",
            EventKind::StreamTerminated { .. } => "STREAM_TERMINATED",
            EventKind::TimetableUpdateApplied { .. } => "TIMETABLE_UPDATE_APPLIED",
            EventKind::TimetableUpdateIgnored { .. } => "TIMETABLE_UPDATE_IGNORED",
            EventKind::BarRejected { .. } => "BAR_REJECTED",
            EventKind::UnknownExecutionUpdate { .. } => "UNKNOWN_EXECUTION_UPDATE",
            EventKind::LateFill { .. } => "LATE_FILL",
            EventKind::ConnectionStatusChanged { .. } => "CONNECTION_STATUS_CHANGED",
            EventKind::RecoveryStateChanged { .. } => "RECOVERY_STATE_CHANGED",
            EventKind::FeedStatusChanged { .. } => "FEED_STATUS_CHANGED",
            EventKind::KillSwitchChanged { .. } => "KILL_SWITCH_CHANGED",
            EventKind::LiveArmed => "LIVE_ARMED",
            EventKind::IdempotencyViolation { .. } => "IDEMPOTENCY_VIOLATION",
            EventKind::StreamFault { .. } => "STREAM_FAULT",
        }
    }
}

/// Fire-and-forget consumer of the event stream. Implementations must not
/// block the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RobotEvent);
}

/// Collects events in memory. Used by tests and by replay runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RobotEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RobotEvent> {
        self.events.lock().clone()
    }

    /// Number of events whose kind has the given name.
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: RobotEvent) {
        self.events.lock().push(event);
    }
}

/// Discards events; tracing still sees them through the emitter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RobotEvent) {}
}

/// Handle the core emits through: logs the event, then forwards it.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, event: RobotEvent) {
        log_event(&event);
        self.sink.emit(event);
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

fn log_event(event: &RobotEvent) {
    let day = event.trading_day;
    let stream = event.stream_id.as_ref().map(StreamId::as_str).unwrap_or("-");
    let intent = event.intent_id.as_ref().map(IntentId::short).unwrap_or("-");
    let name = event.kind.name();
    match event.severity {
        Severity::Debug => {
            tracing::debug!(
                trading_day = %day,
                stream_id = stream,
                intent_id = intent,
                event = name,
                detail = ?event.kind
            )
        }
        Severity::Info => {
            tracing::info!(
                trading_day = %day,
                stream_id = stream,
                intent_id = intent,
                event = name,
                detail = ?event.kind
            )
        }
        Severity::Warn => {
            tracing::warn!(
                trading_day = %day,
                stream_id = stream,
                intent_id = intent,
                event = name,
                detail = ?event.kind
            )
        }
        Severity::Error => {
            tracing::error!(
                trading_day = %day,
                stream_id = stream,
                intent_id = intent,
                event = name,
                detail = ?event.kind
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(kind: EventKind) -> RobotEvent {
        RobotEvent::new(
            TradingDay::from_ymd(2025, 12, 1).unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 1, 13, 30, 0).unwrap(),
            Severity::Info,
            kind,
        )
    }

    #[test]
    fn events_serialize_flat_with_event_tag() {
        let ev = event(EventKind::BreakoutDetected {
            direction: Direction::Long,
            price: 5005.25,
            immediate: false,
        })
            .for_stream(&StreamId::new("ES1"));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "BREAKOUT_DETECTED");
        assert_eq!(json["stream_id"], "ES1");
        assert_eq!(json["trading_day"], "2025-12-01");
        assert!(json.get("intent_id").is_none());
        let back: RobotEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn serde_tag_matches_kind_name() {
        let ev = event(EventKind::ExecutionSkippedDuplicate {
            role: OrderRole::Entry,
            existing_state: JournalState::Submitted,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], ev.kind.name());
    }

    #[test]
    fn memory_sink_counts_by_name() {
        let sink = Arc::new(MemorySink::new());
        let emitter = EventEmitter::new(sink.clone());
        emitter.emit(event(EventKind::LiveArmed));
        emitter.emit(event(EventKind::KillSwitchChanged { enabled: true }));
        emitter.emit(event(EventKind::LiveArmed));
        assert_eq!(sink.count("LIVE_ARMED"), 2);
        assert_eq!(sink.events().len(), 3);
    }
}
