//! StreamStateMachine: one stream's trading day, from range to exit.
//!
//! Lifecycle:
//! - PreHydration: seed the range from the bar provider if the window already opened
//! - Armed: wait for range start (market close first → NO_TRADE)
//! - RangeBuilding: accumulate bars in `[range_start, decision_time)`
//! - RangeLocked: freeze the range once, then look for the first breakout
//! - InPosition: protective orders after the entry fill, break-even move, forced flatten
//! - Done(reason): inert for the rest of the day
//!
//! The stream never touches shared state directly: everything it consults
//! (journal, adapter, gate, clock, event sink) arrives through a
//! [`StreamContext`] borrowed from the engine for the duration of one call.

pub mod bracket;
pub mod breakeven;
pub mod exit;
pub mod gap;
pub mod range;
pub mod state;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::{dispatch, BarProvider, ExecutionAdapter};
use crate::config::{EngineConfig, InstrumentSpec};
use crate::domain::{
    Bar, BrokerOrderId, Direction, ExecutionUpdate, Instrument, Intent, IntentId, IntentTemplate,
    OrderRole, StreamId, StreamKey, TradingDay, UpdateKind,
};
use crate::events::{EventEmitter, EventKind, RobotEvent, Severity};
use crate::journal::{
    ExecutionJournal, JournalError, JournalRecord, JournalState, RangeLockClaim, RangeLockRecord,
    SubmissionClaim, TerminalOutcome,
};
use crate::risk::{GateContext, GateDecision, GateEnv, RiskGate, StreamFacts};
use crate::time::{LocalTime, TimeError, TimeService};
use crate::timetable::StreamDirective;

use bracket::BracketLevels;
use breakeven::BreakEvenWatcher;
use exit::{ExitHit, SameBarPriority};
use gap::{GapThresholds, GapTracker, GapVerdict};
use range::{BreakoutLevels, LockedRange, RangeAccumulator, RangeWindow};

pub use state::{StreamState, TerminalReason};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("journal: {0}")]
    Journal(#[from] JournalError),

    #[error("time: {0}")]
    Time(#[from] TimeError),

    #[error("stream configuration: {0}")]
    Config(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Immutable per-stream parameters, resolved to UTC for the locked day.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub key: StreamKey,
    pub instrument: Instrument,
    pub instrument_spec: InstrumentSpec,
    pub session_id: String,
    pub decision_local: LocalTime,
    pub range_start: DateTime<Utc>,
    pub decision_time: DateTime<Utc>,
    pub market_close: DateTime<Utc>,
    pub flatten_time: DateTime<Utc>,
    pub be_trigger_fraction: f64,
}

impl StreamSpec {
    pub fn resolve(
        trading_day: TradingDay,
        directive: &StreamDirective,
        config: &EngineConfig,
        time: &TimeService,
    ) -> Result<Self, StreamError> {
        let (instrument, instrument_spec) =
            config.instrument(&directive.instrument).ok_or_else(|| {
                StreamError::Config(format!("unknown instrument '{}'", directive.instrument))
            })?;
        let session = config.sessions.get(&directive.session_id).ok_or_else(|| {
            StreamError::Config(format!("unknown session '{}'", directive.session_id))
        })?;

        let range_start = time.local_time_to_utc(trading_day, session.range_start)?;
        let decision_time = time.local_time_to_utc(trading_day, directive.decision_time)?;
        let flatten_time = time.local_time_to_utc(trading_day, session.flatten_time)?;
        let market_close = time.local_time_to_utc(trading_day, session.market_close)?;
        let ordered = range_start < decision_time
            && decision_time < flatten_time
            && flatten_time < market_close;
        if !ordered {
            return Err(StreamError::Config(format!(
                "session times out of order: range_start={range_start} decision={decision_time} \
                 flatten={flatten_time} close={market_close}"
            )));
        }

        Ok(Self {
            key: StreamKey::new(trading_day, directive.stream_id.clone()),
            instrument,
            instrument_spec: instrument_spec.clone(),
            session_id: directive.session_id.clone(),
            decision_local: directive.decision_time,
            range_start,
            decision_time,
            market_close,
            flatten_time,
            be_trigger_fraction: config.break_even_trigger_fraction,
        })
    }
}

/// Borrowed collaborators for one handler call.
pub struct StreamContext<'a> {
    pub now: DateTime<Utc>,
    pub journal: &'a ExecutionJournal,
    pub adapter: &'a dyn ExecutionAdapter,
    pub bars: &'a dyn BarProvider,
    pub gate: &'a RiskGate,
    pub gate_env: &'a GateEnv<'a>,
    pub events: &'a EventEmitter,
    pub time: &'a TimeService,
    pub priority: SameBarPriority,
    pub bar_interval: Duration,
}

/// Outcome of a timetable update offered to a live stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveUpdate {
    Queued,
    Unchanged,
    Ignored(String),
}

/// Point-in-time view for summaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    pub stream_id: StreamId,
    pub instrument: String,
    pub session_id: String,
    pub state: StreamState,
    pub range: Option<RangeWindow>,
    pub levels: Option<BreakoutLevels>,
    pub direction: Option<Direction>,
    pub entry_fill: Option<f64>,
    pub break_even_applied: bool,
}

#[derive(Debug, Clone)]
struct TradePlan {
    bracket: BracketLevels,
    template: IntentTemplate,
}

#[derive(Debug, Clone)]
struct OrderSlot {
    intent_id: IntentId,
    broker_order_id: Option<BrokerOrderId>,
}

impl OrderSlot {
    fn from_record(record: &JournalRecord) -> Self {
        Self {
            intent_id: record.key.intent_id.clone(),
            broker_order_id: record.broker_order_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct OpenPosition {
    fill_price: f64,
    watcher: BreakEvenWatcher,
    current_stop: f64,
    stop: Option<OrderSlot>,
    target: Option<OrderSlot>,
    break_even: Option<OrderSlot>,
    be_pending: bool,
    be_abandoned: bool,
    target_abandoned: bool,
    model_exit: Option<ExitHit>,
}

impl OpenPosition {
    fn new(fill_price: f64, bracket: &BracketLevels) -> Self {
        Self {
            fill_price,
            watcher: BreakEvenWatcher::new(bracket),
            current_stop: bracket.stop,
            stop: None,
            target: None,
            break_even: None,
            be_pending: false,
            be_abandoned: false,
            target_abandoned: false,
            model_exit: None,
        }
    }
}

enum Submission {
    Placed(OrderSlot),
    Duplicate(JournalRecord),
    Denied,
    Failed(String),
}

pub struct StreamStateMachine {
    spec: StreamSpec,
    state: StreamState,
    accumulator: RangeAccumulator,
    gap: GapTracker,
    last_bar: Option<DateTime<Utc>>,
    locked: Option<LockedRange>,
    plan: Option<TradePlan>,
    entry: Option<OrderSlot>,
    position: Option<OpenPosition>,
    pending_update: Option<StreamDirective>,
    /// A late entry fill still waiting for its flatten.
    flatten_owed: bool,
}

impl StreamStateMachine {
    pub fn new(spec: StreamSpec, gap: GapThresholds) -> Self {
        Self {
            spec,
            state: StreamState::PreHydration,
            accumulator: RangeAccumulator::new(),
            gap: GapTracker::new(gap),
            last_bar: None,
            locked: None,
            plan: None,
            entry: None,
            position: None,
            pending_update: None,
            flatten_owed: false,
        }
    }

    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    pub fn key(&self) -> &StreamKey {
        &self.spec.key
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.spec.key.stream_id
    }

    pub fn instrument(&self) -> &str {
        &self.spec.instrument.symbol
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn locked_range(&self) -> Option<&LockedRange> {
        self.locked.as_ref()
    }

    /// An entry intent has been decided (breakout seen) or journaled.
    pub fn is_committed(&self) -> bool {
        self.plan.is_some() || self.entry.is_some()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            stream_id: self.spec.key.stream_id.clone(),
            instrument: self.spec.instrument.symbol.clone(),
            session_id: self.spec.session_id.clone(),
            state: self.state,
            range: self.locked.map(|l| l.window),
            levels: self.locked.map(|l| l.levels),
            direction: self.plan.as_ref().map(|p| p.bracket.direction),
            entry_fill: self.position.as_ref().map(|p| p.fill_price),
            break_even_applied: self.position.as_ref().is_some_and(|p| p.break_even.is_some()),
        }
    }

    // ─── Entry points ───

    /// Periodic clock advance. Retries gate-denied actions.
    pub fn on_tick(&mut self, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        if self.flatten_owed {
            self.flatten_late_fill(ctx)?;
        }
        if self.state.is_done() {
            return Ok(());
        }
        self.apply_pending_update(ctx)?;
        if self.state == StreamState::PreHydration {
            self.hydrate(ctx.now, ctx)?;
        }
        self.advance_clock(ctx.now, true, ctx)
    }

    /// One bar for this stream's instrument. `ctx.now` is the bar's close.
    pub fn on_bar(
        &mut self,
        bar: &Bar,
        feed_failed: bool,
        ctx: &StreamContext<'_>,
    ) -> Result<(), StreamError> {
        if self.state.is_done() {
            return Ok(());
        }
        if self.state == StreamState::PreHydration {
            self.hydrate(bar.timestamp, ctx)?;
            if self.state.is_done() {
                return Ok(());
            }
        }
        if self.last_bar.is_some_and(|last| bar.timestamp <= last) {
            debug!(stream_id = %self.stream_id(), ts = %bar.timestamp, "bar already seen");
            return Ok(());
        }
        if let Some(previous) = self.last_bar {
            if self.tracks_gaps() {
                if let GapVerdict::Exceeded { reason } =
                    self.gap.observe(previous, bar.timestamp, ctx.bar_interval, feed_failed)
                {
                    self.last_bar = Some(bar.timestamp);
                    return self.invalidate(reason, ctx);
                }
            }
        }
        self.last_bar = Some(bar.timestamp);

        self.advance_clock(bar.timestamp, false, ctx)?;
        match self.state {
            StreamState::RangeBuilding => self.accumulator.add(bar, self.spec.range_start),
            StreamState::RangeLocked => self.watch_breakout(bar, ctx)?,
            StreamState::InPosition => self.on_position_bar(bar, ctx)?,
            _ => {}
        }
        self.advance_clock(bar.timestamp + ctx.bar_interval, false, ctx)
    }

    /// Broker callback for one of this stream's intents. The engine has
    /// already applied it to the journal; `record` is the updated record.
    pub fn on_execution_update(
        &mut self,
        update: &ExecutionUpdate,
        record: &JournalRecord,
        ctx: &StreamContext<'_>,
    ) -> Result<(), StreamError> {
        if self.state.is_done() {
            debug!(
                stream_id = %self.stream_id(),
                intent_id = %update.intent_id.short(),
                "update for finished stream"
            );
            return Ok(());
        }
        let role = record.intent.role;
        match (&update.kind, role) {
            (UpdateKind::Filled { price, .. }, OrderRole::Entry) => {
                if self.state == StreamState::RangeLocked && self.is_entry(&update.intent_id) {
                    self.enter_position(*price, ctx)?;
                }
            }
            (UpdateKind::Rejected { reason }, OrderRole::Entry) => {
                if self.state == StreamState::RangeLocked {
                    let detail = format!("entry rejected by broker: {reason}");
                    self.finish(TerminalReason::ErrorStanddown, Some(detail), ctx);
                }
            }
            (UpdateKind::Cancelled, OrderRole::Entry) => {
                if self.state == StreamState::RangeLocked {
                    let detail = "entry cancelled by broker".to_string();
                    self.finish(TerminalReason::ErrorStanddown, Some(detail), ctx);
                }
            }
            (
                UpdateKind::Filled { price, .. },
                OrderRole::ProtectiveStop | OrderRole::BreakEvenStop | OrderRole::Target,
            ) => {
                if self.state == StreamState::InPosition {
                    self.exit_filled(role, *price, ctx);
                }
            }
            (UpdateKind::Filled { .. }, OrderRole::Flatten) => {
                self.finish(TerminalReason::ForcedFlatten, Some("flatten filled".into()), ctx);
            }
            (UpdateKind::Rejected { reason }, OrderRole::ProtectiveStop) => {
                let detail = format!("protective stop rejected: {reason}");
                self.flatten(TerminalReason::ErrorStanddown, detail, ctx)?;
            }
            (UpdateKind::Cancelled, OrderRole::ProtectiveStop) => {
                let replaced = self.position.as_ref().is_some_and(|p| p.break_even.is_some());
                if self.state == StreamState::InPosition && !replaced {
                    let detail = "protective stop cancelled".to_string();
                    self.flatten(TerminalReason::ErrorStanddown, detail, ctx)?;
                }
            }
            (UpdateKind::Rejected { reason }, OrderRole::BreakEvenStop) => {
                if let (Some(plan), Some(pos)) = (self.plan.as_ref(), self.position.as_mut()) {
                    pos.break_even = None;
                    pos.be_abandoned = true;
                    pos.current_stop = plan.bracket.stop;
                    warn!(
                        stream_id = %self.spec.key.stream_id,
                        %reason,
                        "break-even modify rejected; original stop stays"
                    );
                }
            }
            (UpdateKind::Rejected { reason }, OrderRole::Target) => {
                if let Some(pos) = self.position.as_mut() {
                    pos.target_abandoned = true;
                    warn!(
                        stream_id = %self.spec.key.stream_id,
                        %reason,
                        "target rejected; holding with stop only"
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The broker filled an intent the journal holds as rejected or
    /// cancelled. A late entry fill leaves a position with no bracket, so it
    /// is flattened; a denied flatten is retried on each tick.
    pub fn on_late_fill(
        &mut self,
        role: OrderRole,
        ctx: &StreamContext<'_>,
    ) -> Result<(), StreamError> {
        if role != OrderRole::Entry {
            return Ok(());
        }
        warn!(stream_id = %self.stream_id(), "entry filled after it was written off; flattening");
        self.flatten_owed = true;
        self.flatten_late_fill(ctx)
    }

    /// Offer a timetable update. Applied on the next tick if the stream has
    /// not committed; ignored (with an event) otherwise.
    pub fn offer_directive(
        &mut self,
        directive: StreamDirective,
        ctx: &StreamContext<'_>,
    ) -> DirectiveUpdate {
        if self.state.is_done() {
            return DirectiveUpdate::Ignored("stream already done".into());
        }
        let unchanged = directive.enabled && directive.decision_time == self.spec.decision_local;
        if unchanged {
            return DirectiveUpdate::Unchanged;
        }
        let reason = if self.is_committed() || self.state == StreamState::InPosition {
            Some("stream committed to an intent".to_string())
        } else if self.state == StreamState::RangeLocked && directive.enabled {
            Some("range already locked".to_string())
        } else {
            None
        };
        if let Some(reason) = reason {
            let kind = EventKind::TimetableUpdateIgnored { reason: reason.clone() };
            self.emit(ctx, Severity::Info, kind, None);
            return DirectiveUpdate::Ignored(reason);
        }
        self.pending_update = Some(directive);
        DirectiveUpdate::Queued
    }

    /// Rebuild state from the journal after a restart. Returns true when
    /// anything was restored.
    pub fn restore(&mut self, ctx: &StreamContext<'_>) -> Result<bool, StreamError> {
        let Some(lock) = ctx.journal.range_lock(self.stream_id()) else {
            return Ok(false);
        };
        self.locked = Some(self.locked_from_record(&lock));
        self.state = StreamState::RangeLocked;

        let records = ctx.journal.records_for_stream(self.stream_id());
        if let Some(entry) = records.iter().find(|r| r.intent.role == OrderRole::Entry) {
            let plan = self.plan_from_entry(&entry.intent)?;
            self.plan = Some(plan.clone());
            self.entry = Some(OrderSlot::from_record(entry));
            match entry.state {
                JournalState::Rejected | JournalState::Cancelled => {
                    self.state = StreamState::Done(TerminalReason::ErrorStanddown);
                }
                JournalState::Filled => {
                    let fill = entry.fill_price.unwrap_or(plan.bracket.entry);
                    self.restore_position(fill, &plan, &records);
                }
                _ => {}
            }
        }
        info!(stream_id = %self.stream_id(), state = %self.state, "stream restored from journal");
        self.emit(ctx, Severity::Info, EventKind::StreamRestored { state: self.state }, None);
        Ok(true)
    }

    /// Error path: flatten if exposed, then ERROR_STANDDOWN.
    pub fn stand_down(&mut self, message: &str, ctx: &StreamContext<'_>) {
        if self.state.is_done() {
            return;
        }
        let exposed = self.state == StreamState::InPosition || self.entry.is_some();
        if exposed {
            if let Err(err) = self.flatten(
                TerminalReason::ErrorStanddown,
                message.to_string(),
                ctx,
            ) {
                warn!(stream_id = %self.stream_id(), %err, "flatten during stand-down failed");
            }
        }
        self.finish(TerminalReason::ErrorStanddown, Some(message.to_string()), ctx);
    }

    /// Terminate without touching any collaborator other than the event
    /// sink. Used after a panic, when internal state can't be trusted.
    pub fn abort(&mut self, message: &str, ctx: &StreamContext<'_>) {
        self.finish(TerminalReason::ErrorStanddown, Some(message.to_string()), ctx);
    }

    // ─── Clock ───

    fn advance_clock(
        &mut self,
        now: DateTime<Utc>,
        retry: bool,
        ctx: &StreamContext<'_>,
    ) -> Result<(), StreamError> {
        if self.state == StreamState::Armed {
            if now >= self.spec.market_close {
                self.finish(
                    TerminalReason::NoTrade,
                    Some("market closed before range start".into()),
                    ctx,
                );
                return Ok(());
            }
            if now >= self.spec.range_start {
                self.transition(StreamState::RangeBuilding, ctx);
            }
        }

        if self.state == StreamState::RangeBuilding && now >= self.spec.decision_time {
            self.lock_range(ctx)?;
        }

        if self.state == StreamState::RangeLocked {
            if self.entry.is_none() {
                if now >= self.spec.flatten_time {
                    self.finish(
                        TerminalReason::NoTrade,
                        Some("no entry before cutoff".into()),
                        ctx,
                    );
                    return Ok(());
                }
                if retry && self.plan.is_some() {
                    self.try_entry(ctx)?;
                }
            } else if now >= self.spec.flatten_time {
                self.flatten(
                    TerminalReason::ForcedFlatten,
                    "flatten cutoff with entry working".into(),
                    ctx,
                )?;
            }
        }

        if self.state == StreamState::InPosition {
            if now >= self.spec.flatten_time {
                self.flatten(TerminalReason::ForcedFlatten, "flatten cutoff reached".into(), ctx)?;
                if self.state == StreamState::InPosition && now >= self.spec.market_close {
                    self.finish(
                        TerminalReason::ErrorStanddown,
                        Some("flatten still denied at market close".into()),
                        ctx,
                    );
                }
                return Ok(());
            }
            if retry {
                self.place_protection(ctx)?;
                if self.position.as_ref().is_some_and(|p| p.be_pending) {
                    self.place_break_even(ctx)?;
                }
            }
        }
        Ok(())
    }

    fn hydrate(
        &mut self,
        until: DateTime<Utc>,
        ctx: &StreamContext<'_>,
    ) -> Result<(), StreamError> {
        if until > self.spec.range_start {
            let bars = match ctx.bars.get_bars(self.instrument(), self.spec.range_start, until) {
                Ok(bars) => bars,
                Err(err) => {
                    self.finish(
                        TerminalReason::ErrorStanddown,
                        Some(format!("hydration failed: {err}")),
                        ctx,
                    );
                    return Ok(());
                }
            };
            // Only completed bars: one still forming arrives later on the feed.
            let completed = |b: &&Bar| b.timestamp + ctx.bar_interval <= until && b.is_sane();
            let mut used = 0;
            for bar in bars.iter().filter(completed) {
                if self.last_bar.is_some_and(|last| bar.timestamp <= last) {
                    continue;
                }
                self.accumulator.add(bar, self.spec.range_start);
                self.last_bar = Some(bar.timestamp);
                used += 1;
            }
            info!(stream_id = %self.stream_id(), bars = used, "hydrated range window");
        }
        self.transition(StreamState::Armed, ctx);
        Ok(())
    }

    fn tracks_gaps(&self) -> bool {
        matches!(
            self.state,
            StreamState::RangeBuilding | StreamState::RangeLocked | StreamState::InPosition
        )
    }

    fn invalidate(&mut self, reason: String, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        self.emit(
            ctx,
            Severity::Warn,
            EventKind::RangeInvalidated { reason: reason.clone() },
            None,
        );
        let exposed = self.state == StreamState::InPosition || self.entry.is_some();
        if exposed {
            self.flatten(TerminalReason::ErrorStanddown, reason, ctx)
        } else {
            self.finish(TerminalReason::ErrorStanddown, Some(reason), ctx);
            Ok(())
        }
    }

    // ─── Range ───

    fn lock_range(&mut self, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        let Some(computed) = self.accumulator.lock(
            self.spec.range_start,
            self.spec.decision_time,
            &self.spec.instrument,
        )
        else {
            self.finish(TerminalReason::NoTrade, Some("no bars in range window".into()), ctx);
            return Ok(());
        };
        let record = RangeLockRecord {
            trading_day: self.spec.key.trading_day,
            stream_id: self.spec.key.stream_id.clone(),
            range_high: computed.window.high,
            range_low: computed.window.low,
            breakout_long: computed.levels.long,
            breakout_short: computed.levels.short,
            close_at_lock: computed.close_at_lock,
            bar_count: computed.bar_count,
            locked_at: ctx.now,
        };
        let claim = ctx.journal.claim_range_lock(record)?;
        let locked = self.locked_from_record(claim.record());
        self.locked = Some(locked);
        self.transition(StreamState::RangeLocked, ctx);

        match claim {
            RangeLockClaim::Fresh(r) => {
                self.emit(
                    ctx,
                    Severity::Info,
                    EventKind::RangeLocked {
                        range_high: r.range_high,
                        range_low: r.range_low,
                        range_size: r.range_high - r.range_low,
                        breakout_long: r.breakout_long,
                        breakout_short: r.breakout_short,
                        close_at_lock: r.close_at_lock,
                        bar_count: r.bar_count,
                    },
                    None,
                );
            }
            RangeLockClaim::Existing(_) => {
                debug!(
                    stream_id = %self.stream_id(),
                    "range lock already recorded; reusing persisted values"
                );
            }
        }

        if ctx.now < self.spec.flatten_time {
            if let Some(direction) = locked.levels.immediate(locked.close_at_lock) {
                let entry = self.spec.instrument.round_to_tick(locked.close_at_lock);
                self.decide(direction, entry, true, ctx)?;
            }
        }
        Ok(())
    }

    fn locked_from_record(&self, r: &RangeLockRecord) -> LockedRange {
        LockedRange {
            window: RangeWindow {
                start: self.spec.range_start,
                end: self.spec.decision_time,
                high: r.range_high,
                low: r.range_low,
            },
            levels: BreakoutLevels { long: r.breakout_long, short: r.breakout_short },
            close_at_lock: r.close_at_lock,
            bar_count: r.bar_count,
        }
    }

    fn watch_breakout(&mut self, bar: &Bar, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        if self.is_committed() || bar.timestamp >= self.spec.flatten_time {
            return Ok(());
        }
        let locked = self
            .locked
            .ok_or_else(|| StreamError::Invariant("RangeLocked without a locked range".into()))?;
        if let Some(direction) = locked.levels.detect(bar) {
            self.decide(direction, locked.levels.level(direction), false, ctx)?;
        }
        Ok(())
    }

    // ─── Entry ───

    fn decide(
        &mut self,
        direction: Direction,
        entry: f64,
        immediate: bool,
        ctx: &StreamContext<'_>,
    ) -> Result<(), StreamError> {
        let locked = self
            .locked
            .ok_or_else(|| StreamError::Invariant("breakout without a locked range".into()))?;
        let bracket = BracketLevels::build(
            direction,
            entry,
            locked.window.size(),
            &self.spec.instrument_spec,
            self.spec.be_trigger_fraction,
            &self.spec.instrument,
        );
        let template = self.template(direction, bracket.entry);
        self.emit(
            ctx,
            Severity::Info,
            EventKind::BreakoutDetected { direction, price: bracket.entry, immediate },
            None,
        );
        self.plan = Some(TradePlan { bracket, template });
        self.try_entry(ctx)
    }

    fn template(&self, direction: Direction, entry_price: f64) -> IntentTemplate {
        IntentTemplate {
            trading_day: self.spec.key.trading_day,
            stream_id: self.spec.key.stream_id.clone(),
            instrument: self.spec.instrument.clone(),
            direction,
            quantity: self.spec.instrument_spec.quantity,
            entry_price,
        }
    }

    fn plan_from_entry(&self, intent: &Intent) -> Result<TradePlan, StreamError> {
        let entry = intent
            .entry_price
            .ok_or_else(|| StreamError::Invariant("journaled entry without entry price".into()))?;
        let range_size = self.locked.map(|l| l.window.size()).unwrap_or(0.0);
        let mut bracket = BracketLevels::build(
            intent.direction,
            entry,
            range_size,
            &self.spec.instrument_spec,
            self.spec.be_trigger_fraction,
            &self.spec.instrument,
        );
        if let Some(stop) = intent.stop_price {
            bracket.stop = stop;
        }
        if let Some(target) = intent.target_price {
            bracket.target = target;
        }
        let template = IntentTemplate {
            trading_day: intent.trading_day,
            stream_id: intent.stream_id.clone(),
            instrument: self.spec.instrument.clone(),
            direction: intent.direction,
            quantity: intent.quantity,
            entry_price: entry,
        };
        Ok(TradePlan { bracket, template })
    }

    fn try_entry(&mut self, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        let Some(plan) = self.plan.clone() else {
            return Ok(());
        };
        let intent = plan.template.entry(plan.bracket.stop, plan.bracket.target);
        match self.submit(intent, None, ctx)? {
            Submission::Placed(slot) => self.entry = Some(slot),
            Submission::Duplicate(record) => {
                self.entry = Some(OrderSlot::from_record(&record));
                if record.state == JournalState::Filled {
                    let fill = record.fill_price.unwrap_or(plan.bracket.entry);
                    self.enter_position(fill, ctx)?;
                }
            }
            Submission::Denied => {}
            Submission::Failed(reason) => {
                self.finish(
                    TerminalReason::ErrorStanddown,
                    Some(format!("entry failed: {reason}")),
                    ctx,
                );
            }
        }
        Ok(())
    }

    fn is_entry(&self, intent_id: &IntentId) -> bool {
        self.entry.as_ref().is_some_and(|slot| &slot.intent_id == intent_id)
    }

    // ─── Position ───

    fn enter_position(
        &mut self,
        fill_price: f64,
        ctx: &StreamContext<'_>,
    ) -> Result<(), StreamError> {
        let plan = self
            .plan
            .clone()
            .ok_or_else(|| StreamError::Invariant("entry fill without a trade plan".into()))?;
        self.position = Some(OpenPosition::new(fill_price, &plan.bracket));
        self.transition(StreamState::InPosition, ctx);
        self.place_protection(ctx)
    }

    fn restore_position(&mut self, fill: f64, plan: &TradePlan, records: &[JournalRecord]) {
        let mut pos = OpenPosition::new(fill, &plan.bracket);
        let mut terminal = None;
        for record in records {
            let slot = OrderSlot::from_record(record);
            let filled = record.state == JournalState::Filled;
            match record.intent.role {
                OrderRole::Entry => {}
                OrderRole::ProtectiveStop => {
                    if record.state == JournalState::Rejected {
                        continue;
                    }
                    pos.stop = Some(slot);
                    if filled {
                        terminal = Some(TerminalReason::Stop);
                    }
                }
                OrderRole::Target => {
                    if record.state == JournalState::Rejected {
                        pos.target_abandoned = true;
                        continue;
                    }
                    pos.target = Some(slot);
                    if filled {
                        terminal = Some(TerminalReason::Target);
                    }
                }
                OrderRole::BreakEvenStop => {
                    if record.state == JournalState::Rejected {
                        pos.be_abandoned = true;
                        continue;
                    }
                    pos.break_even = Some(slot);
                    pos.watcher = BreakEvenWatcher::already_fired(&plan.bracket);
                    pos.current_stop = record.intent.stop_price.unwrap_or(plan.bracket.be_stop);
                    if filled {
                        terminal = Some(TerminalReason::BeStop);
                    }
                }
                OrderRole::Flatten => terminal = Some(TerminalReason::ForcedFlatten),
            }
        }
        if terminal == Some(TerminalReason::Stop) && pos.break_even.is_some() {
            terminal = Some(TerminalReason::BeStop);
        }
        self.position = Some(pos);
        self.state = match terminal {
            Some(reason) => StreamState::Done(reason),
            None => StreamState::InPosition,
        };
    }

    fn on_position_bar(&mut self, bar: &Bar, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        let Some(plan) = self.plan.as_ref() else {
            return Err(StreamError::Invariant("in position without a trade plan".into()));
        };
        let target = plan.bracket.target;
        let direction = plan.bracket.direction;
        let Some(pos) = self.position.as_mut() else {
            return Err(StreamError::Invariant("InPosition without a position".into()));
        };
        if pos.model_exit.is_some() {
            return Ok(());
        }

        if let Some(hit) = exit::resolve_bar(
            bar,
            direction,
            pos.current_stop,
            target,
            ctx.priority,
        ) {
            let role = hit.role(pos.break_even.is_some());
            pos.model_exit = Some(hit);
            self.emit(
                ctx,
                Severity::Info,
                EventKind::ExitSignalled { role, price: hit.price() },
                None,
            );
            return Ok(());
        }

        if let Some(new_stop) = pos.watcher.observe(bar) {
            if pos.break_even.is_none() && !pos.be_abandoned {
                self.emit(ctx, Severity::Info, EventKind::BreakEvenTriggered { new_stop }, None);
                self.place_break_even(ctx)?;
            }
        }
        Ok(())
    }

    fn place_protection(&mut self, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        let Some(plan) = self.plan.clone() else {
            return Err(StreamError::Invariant("protection without a trade plan".into()));
        };
        let Some(pos) = self.position.as_ref() else {
            return Ok(());
        };
        let need_stop = pos.stop.is_none();
        let need_target = pos.target.is_none() && !pos.target_abandoned;

        if need_stop {
            let intent = plan.template.protective_stop(plan.bracket.stop);
            match self.submit(intent, None, ctx)? {
                Submission::Placed(slot) => self.set_slot(OrderRole::ProtectiveStop, slot),
                Submission::Duplicate(record) => {
                    self.set_slot(OrderRole::ProtectiveStop, OrderSlot::from_record(&record))
                }
                Submission::Denied => {}
                Submission::Failed(reason) => {
                    return self.flatten(
                        TerminalReason::ErrorStanddown,
                        format!("protective stop failed: {reason}"),
                        ctx,
                    );
                }
            }
        }
        if self.state != StreamState::InPosition {
            return Ok(());
        }
        if need_target {
            let intent = plan.template.target(plan.bracket.target);
            match self.submit(intent, None, ctx)? {
                Submission::Placed(slot) => self.set_slot(OrderRole::Target, slot),
                Submission::Duplicate(record) => {
                    self.set_slot(OrderRole::Target, OrderSlot::from_record(&record))
                }
                Submission::Denied => {}
                Submission::Failed(reason) => {
                    warn!(
                        stream_id = %self.stream_id(),
                        %reason,
                        "target order failed; holding with stop only"
                    );
                    if let Some(pos) = self.position.as_mut() {
                        pos.target_abandoned = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn set_slot(&mut self, role: OrderRole, slot: OrderSlot) {
        if let Some(pos) = self.position.as_mut() {
            match role {
                OrderRole::ProtectiveStop => pos.stop = Some(slot),
                OrderRole::Target => pos.target = Some(slot),
                OrderRole::BreakEvenStop => pos.break_even = Some(slot),
                OrderRole::Entry | OrderRole::Flatten => {}
            }
        }
    }

    fn place_break_even(&mut self, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        let Some(plan) = self.plan.clone() else {
            return Ok(());
        };
        let Some(pos) = self.position.as_mut() else {
            return Ok(());
        };
        if pos.break_even.is_some() || pos.be_abandoned {
            pos.be_pending = false;
            return Ok(());
        }
        let Some(stop_slot) = pos.stop.as_ref() else {
            // No working stop to modify yet; retried once the stop is placed.
            pos.be_pending = true;
            return Ok(());
        };
        let replaces = stop_slot.broker_order_id.clone();
        let new_stop = pos.watcher.new_stop();

        let intent = plan.template.break_even(new_stop);
        let outcome = self.submit(intent, replaces, ctx)?;
        let Some(pos) = self.position.as_mut() else {
            return Ok(());
        };
        match outcome {
            Submission::Placed(slot) => {
                pos.break_even = Some(slot);
                pos.current_stop = new_stop;
                pos.be_pending = false;
            }
            Submission::Duplicate(record) => {
                pos.break_even = Some(OrderSlot::from_record(&record));
                pos.current_stop = new_stop;
                pos.be_pending = false;
            }
            Submission::Denied => pos.be_pending = true,
            Submission::Failed(reason) => {
                pos.be_pending = false;
                pos.be_abandoned = true;
                warn!(
                    stream_id = %self.spec.key.stream_id,
                    %reason,
                    "break-even move failed; original stop stays"
                );
            }
        }
        Ok(())
    }

    fn exit_filled(&mut self, role: OrderRole, price: f64, ctx: &StreamContext<'_>) {
        let (be_applied, model_exit) = match self.position.as_ref() {
            Some(pos) => (pos.break_even.is_some(), pos.model_exit),
            None => (false, None),
        };
        let reason = match role {
            OrderRole::Target => TerminalReason::Target,
            OrderRole::BreakEvenStop => TerminalReason::BeStop,
            _ if be_applied => TerminalReason::BeStop,
            _ => TerminalReason::Stop,
        };
        let actual = match reason {
            TerminalReason::Target => OrderRole::Target,
            TerminalReason::BeStop => OrderRole::BreakEvenStop,
            _ => OrderRole::ProtectiveStop,
        };
        if let Some(model) = model_exit {
            let expected = model.role(be_applied);
            if expected != actual {
                self.emit(
                    ctx,
                    Severity::Warn,
                    EventKind::ParityDivergence { expected, actual },
                    None,
                );
            }
        }
        self.finish(reason, Some(format!("exit filled at {price}")), ctx);
    }

    fn flatten(
        &mut self,
        terminal: TerminalReason,
        detail: String,
        ctx: &StreamContext<'_>,
    ) -> Result<(), StreamError> {
        let Some(plan) = self.plan.clone() else {
            self.finish(terminal, Some(detail), ctx);
            return Ok(());
        };
        match self.submit(plan.template.flatten(), None, ctx)? {
            Submission::Placed(_) | Submission::Duplicate(_) => {
                self.finish(terminal, Some(detail), ctx)
            }
            Submission::Denied if terminal == TerminalReason::ForcedFlatten => {
                // stays exposed; the next tick retries
            }
            Submission::Denied => {
                self.finish(terminal, Some(format!("{detail}; flatten denied")), ctx)
            }
            Submission::Failed(reason) => {
                self.finish(
                    TerminalReason::ErrorStanddown,
                    Some(format!("{detail}; flatten failed: {reason}")),
                    ctx,
                )
            }
        }
        Ok(())
    }

    fn flatten_late_fill(&mut self, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        let Some(plan) = self.plan.clone() else {
            self.flatten_owed = false;
            return Err(StreamError::Invariant("late entry fill without a trade plan".into()));
        };
        match self.submit(plan.template.flatten(), None, ctx)? {
            Submission::Denied => {}
            Submission::Placed(_) | Submission::Duplicate(_) => self.flatten_owed = false,
            Submission::Failed(reason) => {
                self.flatten_owed = false;
                warn!(stream_id = %self.stream_id(), %reason, "late-fill flatten failed");
            }
        }
        self.finish(
            TerminalReason::ErrorStanddown,
            Some("entry filled after it was written off".into()),
            ctx,
        );
        Ok(())
    }

    // ─── Timetable updates ───

    fn apply_pending_update(&mut self, ctx: &StreamContext<'_>) -> Result<(), StreamError> {
        let Some(directive) = self.pending_update.take() else {
            return Ok(());
        };
        if self.is_committed() || self.state == StreamState::InPosition {
            let reason = "stream committed to an intent".to_string();
            self.emit(ctx, Severity::Info, EventKind::TimetableUpdateIgnored { reason }, None);
            return Ok(());
        }
        if !directive.enabled {
            self.emit(
                ctx,
                Severity::Info,
                EventKind::TimetableUpdateApplied {
                    decision_time: directive.decision_time,
                    enabled: false,
                },
                None,
            );
            let detail = directive.block_reason.unwrap_or_else(|| "disabled by timetable".into());
            self.finish(TerminalReason::NoTrade, Some(detail), ctx);
            return Ok(());
        }
        if !self.state.before_lock() {
            self.emit(
                ctx,
                Severity::Info,
                EventKind::TimetableUpdateIgnored { reason: "range already locked".into() },
                None,
            );
            return Ok(());
        }
        let decision = match ctx.time.local_time_to_utc(
            self.spec.key.trading_day,
            directive.decision_time,
        ) {
            Ok(t) => t,
            Err(err) => {
                self.emit(
                    ctx,
                    Severity::Warn,
                    EventKind::TimetableUpdateIgnored { reason: err.to_string() },
                    None,
                );
                return Ok(());
            }
        };
        if decision <= self.spec.range_start || decision >= self.spec.flatten_time {
            self.emit(
                ctx,
                Severity::Warn,
                EventKind::TimetableUpdateIgnored {
                    reason: format!("decision_time {} outside session", directive.decision_time),
                },
                None,
            );
            return Ok(());
        }
        self.spec.decision_time = decision;
        self.spec.decision_local = directive.decision_time;
        self.emit(
            ctx,
            Severity::Info,
            EventKind::TimetableUpdateApplied {
                decision_time: directive.decision_time,
                enabled: true,
            },
            None,
        );
        Ok(())
    }

    // ─── Submission path ───

    /// Gate → journal claim → adapter. Every outcome is reported as an event.
    fn submit(
        &self,
        intent: Intent,
        replaces: Option<BrokerOrderId>,
        ctx: &StreamContext<'_>,
    ) -> Result<Submission, StreamError> {
        let intent_id = intent.intent_id();
        let role = intent.role;
        let facts = StreamFacts {
            stream_id: &self.spec.key.stream_id,
            instrument: &self.spec.instrument.symbol,
            state: self.state,
            entry_committed: self.entry.is_some(),
            unmanaged_fill: self.flatten_owed,
            market_close: self.spec.market_close,
        };
        let gate_ctx = GateContext {
            now: ctx.now,
            env: ctx.gate_env,
            stream: facts,
            intent: &intent,
        };
        if let GateDecision::Deny(denial) = ctx.gate.evaluate(&gate_ctx) {
            self.emit(
                ctx,
                Severity::Warn,
                EventKind::RiskGateDenied { role, gate: denial.gate, reason: denial.reason },
                Some(&intent_id),
            );
            return Ok(Submission::Denied);
        }

        match ctx.journal.record_submission(&intent, ctx.now) {
            Ok(SubmissionClaim::Claimed(_)) => {}
            Ok(SubmissionClaim::AlreadySubmitted(record)) => {
                self.emit(
                    ctx,
                    Severity::Warn,
                    EventKind::ExecutionSkippedDuplicate { role, existing_state: record.state },
                    Some(&intent_id),
                );
                if matches!(record.state, JournalState::Rejected | JournalState::Cancelled) {
                    let reason = record
                        .rejection_reason
                        .clone()
                        .unwrap_or_else(|| record.state.to_string());
                    return Ok(Submission::Failed(format!("previously {reason}")));
                }
                return Ok(Submission::Duplicate(record));
            }
            Err(err) => {
                if err.is_fatal() {
                    self.emit(
                        ctx,
                        Severity::Error,
                        EventKind::IdempotencyViolation { detail: err.to_string() },
                        Some(&intent_id),
                    );
                }
                return Err(err.into());
            }
        }

        let mut request = intent.to_order_request();
        request.replaces = replaces;
        match dispatch(ctx.adapter, &request) {
            Ok(ack) => {
                ctx.journal.record_ack(&intent_id, &ack.broker_order_id, ctx.now)?;
                info!(
                    stream_id = %self.stream_id(),
                    intent_id = %intent_id.short(),
                    role = %role,
                    broker_order_id = %ack.broker_order_id,
                    "order submitted"
                );
                self.emit(
                    ctx,
                    Severity::Info,
                    EventKind::IntentSubmitted {
                        role,
                        broker_order_id: ack.broker_order_id.clone(),
                    },
                    Some(&intent_id),
                );
                Ok(Submission::Placed(OrderSlot {
                    intent_id,
                    broker_order_id: Some(ack.broker_order_id),
                }))
            }
            Err(err) => {
                let reason = err.to_string();
                ctx.journal.record_terminal(
                    &intent_id,
                    TerminalOutcome::Rejected { reason: reason.clone() },
                    ctx.now,
                )?;
                self.emit(
                    ctx,
                    Severity::Warn,
                    EventKind::OrderRejected { role, reason: reason.clone() },
                    Some(&intent_id),
                );
                Ok(Submission::Failed(reason))
            }
        }
    }

    // ─── Events ───

    fn transition(&mut self, to: StreamState, ctx: &StreamContext<'_>) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.emit(ctx, Severity::Info, EventKind::StateTransition { from, to }, None);
    }

    fn finish(&mut self, reason: TerminalReason, detail: Option<String>, ctx: &StreamContext<'_>) {
        if self.state.is_done() {
            return;
        }
        self.transition(StreamState::Done(reason), ctx);
        let severity = if reason == TerminalReason::ErrorStanddown {
            Severity::Warn
        } else {
            Severity::Info
        };
        self.emit(ctx, severity, EventKind::StreamTerminated { reason, detail }, None);
    }

    fn emit(
        &self,
        ctx: &StreamContext<'_>,
        severity: Severity,
        kind: EventKind,
        intent_id: Option<&IntentId>,
    ) {
        let mut event = RobotEvent::new(self.spec.key.trading_day, ctx.now, severity, kind)
            .for_stream(&self.spec.key.stream_id);
        if let Some(id) = intent_id {
            event = event.with_intent(id);
        }
        ctx.events.emit(event);
    }
}

impl std::fmt::Debug for StreamStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStateMachine")
            .field("key", &self.spec.key)
            .field("state", &self.state)
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}
