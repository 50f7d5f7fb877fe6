//! Risk gate: the fail-closed predicate chain run before every submission.
//!
//! Gates, in fixed order (first failure wins):
//! 1. RecoveryGate: broker connection must be confirmed healthy
//! 2. KillSwitchGate: global override
//! 3. TimetableGate: accepted timetable matches locked day, timezone, schema
//! 4. StreamEligibilityGate: stream state allows this order role now
//! 5. IntentCompletenessGate: canonical fields present and consistent
//! 6. ExecutionModeGate: live trading needs config enablement plus runtime arming

pub mod gates;
pub mod kill_switch;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ExecutionMode;
use crate::domain::{Intent, StreamId, TradingDay};
use crate::engine::recovery::RecoveryState;
use crate::stream::StreamState;
use crate::timetable::TimetableStatus;

pub use gates::{
    ExecutionModeGate, Gate, IntentCompletenessGate, KillSwitchGate, RecoveryGate,
    StreamEligibilityGate, TimetableGate,
};
pub use kill_switch::KillSwitch;

/// Which gate produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateKind {
    RecoveryState,
    KillSwitch,
    TimetableValidity,
    StreamEligibility,
    IntentCompleteness,
    ExecutionMode,
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GateKind::RecoveryState => "RecoveryState",
            GateKind::KillSwitch => "KillSwitch",
            GateKind::TimetableValidity => "TimetableValidity",
            GateKind::StreamEligibility => "StreamEligibility",
            GateKind::IntentCompleteness => "IntentCompleteness",
            GateKind::ExecutionMode => "ExecutionMode",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Denial {
    pub gate: GateKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    Deny(Denial),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Stream-side facts the eligibility gate needs.
#[derive(Debug, Clone)]
pub struct StreamFacts<'a> {
    pub stream_id: &'a StreamId,
    pub instrument: &'a str,
    pub state: StreamState,
    /// An entry intent for this stream is already journaled.
    pub entry_committed: bool,
    /// The broker filled an entry the stream had written off.
    pub unmanaged_fill: bool,
    pub market_close: DateTime<Utc>,
}

/// Engine-wide facts shared by every evaluation in one handler call.
#[derive(Debug, Clone)]
pub struct GateEnv<'a> {
    pub locked_day: TradingDay,
    pub recovery: RecoveryState,
    pub kill_switch_enabled: bool,
    pub timetable: Option<&'a TimetableStatus>,
    pub expected_timezone: &'a str,
    pub mode: ExecutionMode,
    pub live_enabled: bool,
    pub live_armed: bool,
}

/// Everything a gate may look at. Gates never mutate anything.
#[derive(Debug, Clone)]
pub struct GateContext<'a> {
    pub now: DateTime<Utc>,
    pub env: &'a GateEnv<'a>,
    pub stream: StreamFacts<'a>,
    pub intent: &'a Intent,
}

/// The ordered gate chain.
pub struct RiskGate {
    gates: Vec<Box<dyn Gate>>,
}

impl RiskGate {
    /// The production chain in its fixed order.
    pub fn standard() -> Self {
        Self {
            gates: vec![
                Box::new(RecoveryGate),
                Box::new(KillSwitchGate),
                Box::new(TimetableGate),
                Box::new(StreamEligibilityGate),
                Box::new(IntentCompletenessGate),
                Box::new(ExecutionModeGate),
            ],
        }
    }

    pub fn evaluate(&self, ctx: &GateContext<'_>) -> GateDecision {
        for gate in &self.gates {
            if let Err(reason) = gate.check(ctx) {
                tracing::debug!(
                    gate = %gate.kind(),
                    %reason,
                    stream_id = %ctx.stream.stream_id,
                    "gate denied"
                );
                return GateDecision::Deny(Denial { gate: gate.kind(), reason });
            }
        }
        GateDecision::Allow
    }

    pub fn order(&self) -> Vec<GateKind> {
        self.gates.iter().map(|g| g.kind()).collect()
    }
}

impl Default for RiskGate {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for RiskGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskGate").field("order", &self.order()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Instrument, IntentTemplate};
    use chrono::TimeZone;

    // ─── Helpers ───

    fn day() -> TradingDay {
        TradingDay::from_ymd(2025, 12, 1).unwrap()
    }

    fn status() -> TimetableStatus {
        TimetableStatus {
            trading_day: day(),
            timezone: "America/Chicago".into(),
            schema_version: 1,
            revision: 1,
        }
    }

    fn entry() -> Intent {
        IntentTemplate {
            trading_day: day(),
            stream_id: StreamId::new("ES1"),
            instrument: Instrument::new("ES", 0.25).unwrap(),
            direction: Direction::Long,
            quantity: 1,
            entry_price: 5005.25,
        }
        .entry(4995.25, 5015.25)
    }

    #[test]
    fn standard_order_is_fixed() {
        assert_eq!(
            RiskGate::standard().order(),
            vec![
                GateKind::RecoveryState,
                GateKind::KillSwitch,
                GateKind::TimetableValidity,
                GateKind::StreamEligibility,
                GateKind::IntentCompleteness,
                GateKind::ExecutionMode,
            ]
        );
    }

    #[test]
    fn first_failing_gate_wins() {
        let tt = status();
        let env = GateEnv {
            locked_day: day(),
            recovery: RecoveryState::Disconnected,
            kill_switch_enabled: true,
            timetable: Some(&tt),
            expected_timezone: "America/Chicago",
            mode: ExecutionMode::Sim,
            live_enabled: false,
            live_armed: false,
        };
        let intent = entry();
        let sid = StreamId::new("ES1");
        let ctx = GateContext {
            now: Utc.with_ymd_and_hms(2025, 12, 1, 14, 0, 0).unwrap(),
            env: &env,
            stream: StreamFacts {
                stream_id: &sid,
                instrument: "ES",
                state: StreamState::RangeLocked,
                entry_committed: false,
                unmanaged_fill: false,
                market_close: Utc.with_ymd_and_hms(2025, 12, 1, 22, 0, 0).unwrap(),
            },
            intent: &intent,
        };
        match RiskGate::standard().evaluate(&ctx) {
            GateDecision::Deny(d) => assert_eq!(d.gate, GateKind::RecoveryState),
            GateDecision::Allow => panic!("expected denial"),
        }
    }
}
