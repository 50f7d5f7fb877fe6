//! Individual gates. Each is a pure predicate over a [`GateContext`] and
//! can be tested on its own.

use crate::config::ExecutionMode;
use crate::domain::{Direction, Intent, OrderRole};
use crate::engine::recovery::RecoveryState;
use crate::stream::StreamState;

use super::{GateContext, GateKind};

/// A single check in the risk chain.
pub trait Gate: Send + Sync {
    fn kind(&self) -> GateKind;

    /// `Err(reason)` denies the submission.
    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String>;
}

/// Blocks everything unless the broker connection is confirmed healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryGate;

impl Gate for RecoveryGate {
    fn kind(&self) -> GateKind {
        GateKind::RecoveryState
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        match ctx.env.recovery {
            RecoveryState::Healthy => Ok(()),
            other => Err(format!("broker connection not healthy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KillSwitchGate;

impl Gate for KillSwitchGate {
    fn kind(&self) -> GateKind {
        GateKind::KillSwitch
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        if ctx.env.kill_switch_enabled {
            Err("kill switch enabled".into())
        } else {
            Ok(())
        }
    }
}

/// The accepted timetable must belong to the locked day and the configured
/// timezone, with a supported schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimetableGate;

impl Gate for TimetableGate {
    fn kind(&self) -> GateKind {
        GateKind::TimetableValidity
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        let status = ctx.env.timetable.ok_or_else(|| "no valid timetable loaded".to_string())?;
        if status.trading_day != ctx.env.locked_day {
            return Err(format!(
                "timetable day {} != locked day {}",
                status.trading_day,
                ctx.env.locked_day
            ));
        }
        if status.timezone != ctx.env.expected_timezone {
            return Err(format!(
                "timetable timezone {} != {}",
                status.timezone,
                ctx.env.expected_timezone
            ));
        }
        if !status.schema_valid() {
            return Err(format!("timetable schema version {} unsupported", status.schema_version));
        }
        Ok(())
    }
}

/// Role-aware stream state check.
///
/// - Entry: range locked, nothing committed yet, strictly before market close
/// - Stop / target / break-even: in position, before market close
/// - Flatten: in position, a committed entry still working, or an entry the
///   broker filled after the stream wrote it off
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamEligibilityGate;

impl Gate for StreamEligibilityGate {
    fn kind(&self) -> GateKind {
        GateKind::StreamEligibility
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        let stream = &ctx.stream;
        if stream.unmanaged_fill && ctx.intent.role == OrderRole::Flatten {
            return Ok(());
        }
        if let StreamState::Done(reason) = stream.state {
            return Err(format!("stream already done ({reason})"));
        }
        let before_close = ctx.now < stream.market_close;
        match ctx.intent.role {
            OrderRole::Entry => {
                if stream.state != StreamState::RangeLocked {
                    return Err(format!("entry requires RangeLocked, stream is {}", stream.state));
                }
                if stream.entry_committed {
                    return Err("entry already committed for this stream".into());
                }
                if !before_close {
                    return Err("session window closed".into());
                }
                Ok(())
            }
            OrderRole::ProtectiveStop | OrderRole::Target | OrderRole::BreakEvenStop => {
                if stream.state != StreamState::InPosition {
                    return Err(format!(
                        "{} requires InPosition, stream is {}",
                        ctx.intent.role,
                        stream.state
                    ));
                }
                if !before_close {
                    return Err("session window closed".into());
                }
                Ok(())
            }
            OrderRole::Flatten => match stream.state {
                StreamState::InPosition => Ok(()),
                StreamState::RangeLocked if stream.entry_committed => Ok(()),
                other => Err(format!("nothing to flatten in {other}")),
            },
        }
    }
}

/// Required canonical fields present, tick-aligned and geometrically sane.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentCompletenessGate;

impl IntentCompletenessGate {
    fn price(intent: &Intent, field: &str, value: Option<f64>) -> Result<f64, String> {
        let price = value.ok_or_else(|| format!("{} intent missing {field}", intent.role))?;
        if !(price.is_finite() && price > 0.0) {
            return Err(format!("{field} {price} not a positive finite price"));
        }
        let ticks = price / intent.tick_size;
        if (ticks - ticks.round()).abs() > 1e-6 {
            return Err(format!("{field} {price} not on tick grid {}", intent.tick_size));
        }
        Ok(price)
    }
}

impl Gate for IntentCompletenessGate {
    fn kind(&self) -> GateKind {
        GateKind::IntentCompleteness
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        let intent = ctx.intent;
        if intent.trading_day != ctx.env.locked_day {
            return Err(format!(
                "intent day {} != locked day {}",
                intent.trading_day,
                ctx.env.locked_day
            ));
        }
        if &intent.stream_id != ctx.stream.stream_id {
            return Err(format!("intent stream {} != {}", intent.stream_id, ctx.stream.stream_id));
        }
        if intent.instrument != ctx.stream.instrument {
            return Err(format!(
                "intent instrument {} != {}",
                intent.instrument,
                ctx.stream.instrument
            ));
        }
        if intent.quantity == 0 {
            return Err("quantity must be > 0".into());
        }
        if !(intent.tick_size.is_finite() && intent.tick_size > 0.0) {
            return Err(format!("tick_size {} invalid", intent.tick_size));
        }
        match intent.role {
            OrderRole::Entry => {
                let entry = Self::price(intent, "entry_price", intent.entry_price)?;
                let stop = Self::price(intent, "stop_price", intent.stop_price)?;
                let target = Self::price(intent, "target_price", intent.target_price)?;
                let ordered = match intent.direction {
                    Direction::Long => stop < entry && entry < target,
                    Direction::Short => target < entry && entry < stop,
                };
                if !ordered {
                    return Err(format!(
                        "{} bracket out of order: stop={stop} entry={entry} target={target}",
                        intent.direction
                    ));
                }
            }
            OrderRole::ProtectiveStop | OrderRole::BreakEvenStop => {
                Self::price(intent, "stop_price", intent.stop_price)?;
            }
            OrderRole::Target => {
                Self::price(intent, "target_price", intent.target_price)?;
            }
            OrderRole::Flatten => {}
        }
        Ok(())
    }
}

/// Sim passes. Live needs `live_enabled` in config and a runtime arm.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionModeGate;

impl Gate for ExecutionModeGate {
    fn kind(&self) -> GateKind {
        GateKind::ExecutionMode
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        match ctx.env.mode {
            ExecutionMode::Sim => Ok(()),
            ExecutionMode::Live if !ctx.env.live_enabled => {
                Err("live mode not enabled in configuration".into())
            }
            ExecutionMode::Live if !ctx.env.live_armed => Err("live mode not armed".into()),
            ExecutionMode::Live => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Instrument, IntentTemplate, StreamId, TradingDay};
    use crate::risk::{GateEnv, StreamFacts};
    use crate::stream::TerminalReason;
    use crate::timetable::TimetableStatus;
    use chrono::{DateTime, TimeZone, Utc};

    // ─── Helpers ───

    fn day() -> TradingDay {
        TradingDay::from_ymd(2025, 12, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, h, m, 0).unwrap()
    }

    fn template() -> IntentTemplate {
        IntentTemplate {
            trading_day: day(),
            stream_id: StreamId::new("ES1"),
            instrument: Instrument::new("ES", 0.25).unwrap(),
            direction: Direction::Long,
            quantity: 1,
            entry_price: 5005.25,
        }
    }

    fn status() -> TimetableStatus {
        TimetableStatus {
            trading_day: day(),
            timezone: "America/Chicago".into(),
            schema_version: 1,
            revision: 1,
        }
    }

    fn env(tt: &TimetableStatus) -> GateEnv<'_> {
        GateEnv {
            locked_day: day(),
            recovery: RecoveryState::Healthy,
            kill_switch_enabled: false,
            timetable: Some(tt),
            expected_timezone: "America/Chicago",
            mode: ExecutionMode::Sim,
            live_enabled: false,
            live_armed: false,
        }
    }

    fn check<G: Gate>(
        gate: G,
        env: &GateEnv<'_>,
        state: StreamState,
        intent: &Intent,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let sid = StreamId::new("ES1");
        let ctx = GateContext {
            now,
            env,
            stream: StreamFacts {
                stream_id: &sid,
                instrument: "ES",
                state,
                entry_committed: false,
                unmanaged_fill: false,
                market_close: at(22, 0),
            },
            intent,
        };
        gate.check(&ctx)
    }

    #[test]
    fn recovery_gate_blocks_unless_healthy() {
        let tt = status();
        let mut e = env(&tt);
        let intent = template().entry(4995.25, 5015.25);
        assert!(check(RecoveryGate, &e, StreamState::RangeLocked, &intent, at(14, 0)).is_ok());
        for state in [
            RecoveryState::Disconnected,
            RecoveryState::AwaitingSync,
            RecoveryState::SyncFailed,
        ] {
            e.recovery = state;
            assert!(check(RecoveryGate, &e, StreamState::RangeLocked, &intent, at(14, 0)).is_err());
        }
    }

    #[test]
    fn kill_switch_gate_blocks_flatten_too() {
        let tt = status();
        let mut e = env(&tt);
        e.kill_switch_enabled = true;
        let flatten = template().flatten();
        assert!(check(KillSwitchGate, &e, StreamState::InPosition, &flatten, at(21, 55)).is_err());
    }

    #[test]
    fn timetable_gate_requires_matching_status() {
        let tt = status();
        let mut e = env(&tt);
        let intent = template().entry(4995.25, 5015.25);
        assert!(check(TimetableGate, &e, StreamState::RangeLocked, &intent, at(14, 0)).is_ok());

        e.timetable = None;
        assert!(check(TimetableGate, &e, StreamState::RangeLocked, &intent, at(14, 0)).is_err());

        let mut wrong_tz = status();
        wrong_tz.timezone = "Europe/London".into();
        let e = env(&wrong_tz);
        assert!(check(TimetableGate, &e, StreamState::RangeLocked, &intent, at(14, 0)).is_err());
    }

    #[test]
    fn eligibility_gate_is_role_aware() {
        let tt = status();
        let e = env(&tt);
        let t = template();
        let entry = t.entry(4995.25, 5015.25);
        let stop = t.protective_stop(4995.25);
        let flatten = t.flatten();

        let eligible = |state: StreamState, intent: &Intent, now: DateTime<Utc>| {
            check(StreamEligibilityGate, &e, state, intent, now)
        };
        assert!(eligible(StreamState::RangeLocked, &entry, at(14, 0)).is_ok());
        assert!(eligible(StreamState::RangeBuilding, &entry, at(14, 0)).is_err());
        assert!(eligible(StreamState::RangeLocked, &entry, at(22, 0)).is_err());
        assert!(eligible(StreamState::InPosition, &stop, at(14, 0)).is_ok());
        assert!(eligible(StreamState::RangeLocked, &stop, at(14, 0)).is_err());
        assert!(eligible(StreamState::InPosition, &flatten, at(23, 0)).is_ok());
        assert!(eligible(StreamState::Done(TerminalReason::NoTrade), &flatten, at(14, 0)).is_err());
    }

    #[test]
    fn unmanaged_fill_lets_only_a_flatten_through_a_done_stream() {
        let tt = status();
        let e = env(&tt);
        let t = template();
        let sid = StreamId::new("ES1");
        let facts = StreamFacts {
            stream_id: &sid,
            instrument: "ES",
            state: StreamState::Done(TerminalReason::ErrorStanddown),
            entry_committed: true,
            unmanaged_fill: true,
            market_close: at(22, 0),
        };
        let flatten = t.flatten();
        let ctx = GateContext { now: at(14, 0), env: &e, stream: facts.clone(), intent: &flatten };
        assert!(StreamEligibilityGate.check(&ctx).is_ok());

        let stop = t.protective_stop(4995.25);
        let ctx = GateContext { now: at(14, 0), env: &e, stream: facts, intent: &stop };
        assert!(StreamEligibilityGate.check(&ctx).is_err());
    }

    #[test]
    fn completeness_gate_checks_bracket_geometry() {
        let tt = status();
        let e = env(&tt);
        let t = template();
        let complete = |state: StreamState, intent: &Intent| {
            check(IntentCompletenessGate, &e, state, intent, at(14, 0))
        };
        assert!(complete(StreamState::RangeLocked, &t.entry(4995.25, 5015.25)).is_ok());
        // stop above entry for a long
        assert!(complete(StreamState::RangeLocked, &t.entry(5010.0, 5015.25)).is_err());
        // off tick
        assert!(complete(StreamState::RangeLocked, &t.entry(4995.1, 5015.25)).is_err());

        let mut missing = t.protective_stop(4995.25);
        missing.stop_price = None;
        assert!(complete(StreamState::InPosition, &missing).is_err());

        let mut zero = t.entry(4995.25, 5015.25);
        zero.quantity = 0;
        assert!(complete(StreamState::RangeLocked, &zero).is_err());
    }

    #[test]
    fn execution_mode_gate_requires_two_step_live() {
        let tt = status();
        let mut e = env(&tt);
        let intent = template().entry(4995.25, 5015.25);
        let mode_ok = |e: &GateEnv<'_>| {
            check(ExecutionModeGate, e, StreamState::RangeLocked, &intent, at(14, 0)).is_ok()
        };
        assert!(mode_ok(&e));

        e.mode = ExecutionMode::Live;
        assert!(!mode_ok(&e));
        e.live_enabled = true;
        assert!(!mode_ok(&e));
        e.live_armed = true;
        assert!(mode_ok(&e));
    }
}
