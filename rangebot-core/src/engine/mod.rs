//! RobotEngine: trading-day lock, stream lifecycle, bar/tick fan-out and
//! connection recovery.
//!
//! Every entry point takes `&mut self`: the engine is a single writer. Hosts
//! that receive callbacks on several threads wrap it in [`SharedEngine`] or
//! drive it from one actor thread.
//!
//! Per handler call the engine builds one [`StreamContext`] and hands it to
//! each affected stream inside a panic boundary. A stream that errors or
//! panics is stood down; the others keep running.

pub mod feed;
pub mod recovery;
pub mod registry;
pub mod shared;
pub mod summary;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::adapter::{BarProvider, ConnectionStatus, ExecutionAdapter};
use crate::config::{ConfigError, EngineConfig, ExecutionMode};
use crate::domain::{Bar, ExecutionUpdate, StreamId, StreamKey, TradingDay, UpdateKind};
use crate::events::{EventEmitter, EventKind, EventSink, RobotEvent, Severity};
use crate::journal::{
    ExecutionJournal, JournalError, JournalRecord, JournalState, JournalStore, TerminalOutcome,
};
use crate::risk::{GateEnv, KillSwitch, RiskGate};
use crate::stream::{
    DirectiveUpdate, StreamContext, StreamError, StreamSnapshot, StreamSpec, StreamState,
    StreamStateMachine,
};
use crate::time::{TimeError, TimeService};
use crate::timetable::{Timetable, TimetableError, TimetableStatus};

pub use feed::{BarRejectReason, FeedMonitor, FeedStatus};
pub use recovery::{RecoveryMachine, RecoveryState, SyncOutcome};
pub use registry::StreamRegistry;
pub use shared::SharedEngine;
pub use summary::EngineSummary;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine not started: no trading day locked")]
    NotStarted,

    #[error("trading day {0} already locked for this run")]
    AlreadyStarted(TradingDay),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("time: {0}")]
    Time(#[from] TimeError),

    #[error("journal: {0}")]
    Journal(#[from] JournalError),

    #[error("timetable rejected: {0}")]
    Timetable(#[from] TimetableError),

    #[error("{0} streams still active")]
    StreamsActive(usize),

    #[error("live execution is not enabled in configuration")]
    LiveNotEnabled,

    #[error("arming phrase does not match; expected \"{expected}\"")]
    ArmPhraseMismatch { expected: String },
}

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct EngineDeps {
    pub adapter: Arc<dyn ExecutionAdapter>,
    pub bars: Arc<dyn BarProvider>,
    pub store: Arc<dyn JournalStore>,
    pub events: Arc<dyn EventSink>,
    pub kill_switch: KillSwitch,
}

/// What a timetable load did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimetableOutcome {
    pub revision: u64,
    pub created: Vec<StreamId>,
    pub restored: Vec<StreamId>,
    pub updated: Vec<StreamId>,
    pub rejected: Vec<StreamId>,
}

/// Everything scoped to the locked trading day.
struct DaySession {
    trading_day: TradingDay,
    journal: ExecutionJournal,
    registry: StreamRegistry,
    timetable: Option<TimetableStatus>,
    feed: FeedMonitor,
}

pub struct RobotEngine {
    config: EngineConfig,
    time: TimeService,
    gate: RiskGate,
    adapter: Arc<dyn ExecutionAdapter>,
    bars: Arc<dyn BarProvider>,
    store: Arc<dyn JournalStore>,
    events: EventEmitter,
    kill_switch: KillSwitch,
    kill_switch_seen: bool,
    recovery: RecoveryMachine,
    live_armed: bool,
    revision: u64,
    day: Option<DaySession>,
}

impl RobotEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Result<Self, EngineError> {
        config.validate()?;
        let time = config.time_service()?;
        let kill_switch_seen = deps.kill_switch.is_enabled();
        Ok(Self {
            config,
            time,
            gate: RiskGate::standard(),
            adapter: deps.adapter,
            bars: deps.bars,
            store: deps.store,
            events: EventEmitter::new(deps.events),
            kill_switch: deps.kill_switch,
            kill_switch_seen,
            recovery: RecoveryMachine::new(),
            live_armed: false,
            revision: 0,
            day: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn time(&self) -> &TimeService {
        &self.time
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.state()
    }

    pub fn trading_day(&self) -> Option<TradingDay> {
        self.day.as_ref().map(|d| d.trading_day)
    }

    pub fn journal(&self) -> Option<&ExecutionJournal> {
        self.day.as_ref().map(|d| &d.journal)
    }

    pub fn is_live_armed(&self) -> bool {
        self.live_armed
    }

    pub fn stream_state(&self, stream_id: &StreamId) -> Option<StreamState> {
        self.day.as_ref()?.registry.find(stream_id).map(|s| s.state())
    }

    pub fn stream_snapshot(&self, stream_id: &StreamId) -> Option<StreamSnapshot> {
        self.day.as_ref()?.registry.find(stream_id).map(|s| s.snapshot())
    }

    // ─── Day lifecycle ───

    /// Lock the trading day for this run, open its journal and run the
    /// first broker sync. Submissions stay blocked until a sync is clean.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<TradingDay, EngineError> {
        if let Some(day) = &self.day {
            return Err(EngineError::AlreadyStarted(day.trading_day));
        }
        let trading_day = self.time.trading_day_of(now);
        let journal = ExecutionJournal::open(Arc::clone(&self.store), trading_day)?;
        info!(
            %trading_day,
            timezone = self.time.timezone_name(),
            rollover_hour = self.time.rollover_hour(),
            restored_records = journal.all_records().len(),
            "trading day locked"
        );
        self.day = Some(DaySession {
            trading_day,
            journal,
            registry: StreamRegistry::new(),
            timetable: None,
            feed: FeedMonitor::new(),
        });
        self.emit(
            now,
            Severity::Info,
            EventKind::TradingDayLocked { timezone: self.time.timezone_name().to_string() },
        );
        if self.recovery.needs_sync() {
            self.run_sync(now);
        }
        Ok(trading_day)
    }

    /// Archive the day's journal. Every stream must be done.
    pub fn close_day(&mut self, now: DateTime<Utc>) -> Result<EngineSummary, EngineError> {
        let summary = self.summary()?;
        let day = self.day.as_ref().ok_or(EngineError::NotStarted)?;
        let active = day.registry.active_count();
        if active > 0 {
            return Err(EngineError::StreamsActive(active));
        }
        day.journal.archive()?;
        info!(
            trading_day = %day.trading_day,
            outcomes = ?summary.outcomes(),
            at = %now,
            "trading day closed"
        );
        self.day = None;
        self.live_armed = false;
        Ok(summary)
    }

    pub fn summary(&self) -> Result<EngineSummary, EngineError> {
        let day = self.day.as_ref().ok_or(EngineError::NotStarted)?;
        Ok(EngineSummary {
            trading_day: day.trading_day,
            recovery: self.recovery.state(),
            kill_switch_enabled: self.kill_switch.is_enabled(),
            timetable_revision: day.timetable.as_ref().map(|t| t.revision),
            streams: day.registry.iter().map(StreamStateMachine::snapshot).collect(),
            bars_accepted: day.feed.accepted(),
            bar_rejections: day.feed.rejections().clone(),
            journal_records: day.journal.all_records().len(),
        })
    }

    // ─── Timetable ───

    /// Validate and apply a timetable. A whole-document failure leaves the
    /// previous timetable (if any) in force.
    pub fn load_timetable(
        &mut self,
        timetable: &Timetable,
        now: DateTime<Utc>,
    ) -> Result<TimetableOutcome, EngineError> {
        let trading_day = self.trading_day().ok_or(EngineError::NotStarted)?;
        let validated = match timetable.validate(trading_day, &self.config) {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "timetable rejected");
                self.emit(
                    now,
                    Severity::Error,
                    EventKind::TimetableRejected { reason: err.to_string() },
                );
                return Err(err.into());
            }
        };

        self.revision += 1;
        let revision = self.revision;
        if let Some(day) = self.day.as_mut() {
            day.timetable = Some(TimetableStatus {
                trading_day,
                timezone: timetable.timezone.clone(),
                schema_version: timetable.schema_version,
                revision,
            });
        }
        self.emit(
            now,
            Severity::Info,
            EventKind::TimetableAccepted {
                revision,
                accepted: validated.accepted.len(),
                rejected: validated.rejected.len(),
            },
        );

        let mut outcome = TimetableOutcome { revision, ..Default::default() };
        for rejection in &validated.rejected {
            self.emit_for(
                now,
                &rejection.stream_id,
                Severity::Warn,
                EventKind::DirectiveRejected { reason: rejection.reason.clone() },
            );
            outcome.rejected.push(rejection.stream_id.clone());
        }

        for directive in validated.accepted {
            let key = StreamKey::new(trading_day, directive.stream_id.clone());
            let exists = self.day.as_ref().is_some_and(|d| d.registry.contains(&key));
            if exists {
                let id = directive.stream_id.clone();
                let mut queued = false;
                self.with_streams(now, &[key], |stream, ctx| {
                    let update = stream.offer_directive(directive.clone(), ctx);
                    queued = update == DirectiveUpdate::Queued;
                    Ok(())
                });
                if queued {
                    outcome.updated.push(id);
                }
                continue;
            }
            if !directive.enabled {
                debug!(
                    stream_id = %directive.stream_id,
                    reason = ?directive.block_reason,
                    "directive disabled; no stream"
                );
                continue;
            }
            let spec = match StreamSpec::resolve(
                trading_day,
                &directive,
                &self.config,
                &self.time,
            ) {
                Ok(spec) => spec,
                Err(err) => {
                    self.emit_for(
                        now,
                        &directive.stream_id,
                        Severity::Warn,
                        EventKind::DirectiveRejected { reason: err.to_string() },
                    );
                    outcome.rejected.push(directive.stream_id.clone());
                    continue;
                }
            };
            let stream = StreamStateMachine::new(spec, self.config.gap);
            if let Some(day) = self.day.as_mut() {
                day.registry.insert(stream);
            }
            self.emit_for(
                now,
                &directive.stream_id,
                Severity::Info,
                EventKind::StreamCreated {
                    instrument: directive.instrument.clone(),
                    session_id: directive.session_id.clone(),
                    decision_time: directive.decision_time,
                },
            );
            outcome.created.push(directive.stream_id.clone());

            let mut restored = false;
            self.with_streams(now, &[key], |stream, ctx| {
                restored = stream.restore(ctx)?;
                Ok(())
            });
            if restored {
                outcome.restored.push(directive.stream_id.clone());
            }
        }
        info!(
            revision,
            created = outcome.created.len(),
            restored = outcome.restored.len(),
            updated = outcome.updated.len(),
            rejected = outcome.rejected.len(),
            "timetable applied"
        );
        Ok(outcome)
    }

    // ─── Bars and ticks ───

    /// Admit one bar and route it to the instrument's streams. Rejected
    /// bars are counted and reported, never processed.
    pub fn on_bar(&mut self, instrument: &str, bar: &Bar) -> Result<(), EngineError> {
        let trading_day = self.trading_day().ok_or(EngineError::NotStarted)?;
        let bar_close = bar.timestamp + self.config.bar_interval();
        self.poll_kill_switch(bar_close);

        let verdict = if self.config.instruments.get(instrument).is_none() {
            Err(BarRejectReason::UnknownInstrument)
        } else if !bar.is_sane() {
            Err(BarRejectReason::Malformed)
        } else if self.time.trading_day_of(bar.timestamp) != trading_day {
            Err(BarRejectReason::WrongTradingDay)
        } else {
            self.day.as_ref().map_or(Ok(()), |d| d.feed.check_order(instrument, bar.timestamp))
        };

        let Some(day) = self.day.as_mut() else {
            return Err(EngineError::NotStarted);
        };
        if let Err(reason) = verdict {
            day.feed.reject(reason);
            warn!(instrument, ts = %bar.timestamp, ?reason, "bar rejected");
            self.emit(
                bar_close,
                Severity::Warn,
                EventKind::BarRejected {
                    instrument: instrument.to_string(),
                    timestamp: bar.timestamp,
                    reason,
                },
            );
            return Ok(());
        }
        let feed_failed = day.feed.accept(instrument, bar.timestamp);
        let keys = day.registry.keys_for_instrument(instrument);
        self.with_streams(bar_close, &keys, |stream, ctx| stream.on_bar(bar, feed_failed, ctx));
        Ok(())
    }

    /// Clock advance for every stream. Also polls the kill switch and
    /// retries an owed broker sync.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.day.is_none() {
            return Err(EngineError::NotStarted);
        }
        self.poll_kill_switch(now);
        if self.recovery.state() == RecoveryState::SyncFailed {
            self.run_sync(now);
        }
        let keys = self.day.as_ref().map(|d| d.registry.keys()).unwrap_or_default();
        self.with_streams(now, &keys, |stream, ctx| stream.on_tick(ctx));
        Ok(())
    }

    // ─── Broker callbacks ───

    /// Apply a broker notification to the journal, then hand it to the
    /// owning stream.
    pub fn on_execution_update(
        &mut self,
        update: &ExecutionUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let Some(day) = self.day.as_ref() else {
            return Err(EngineError::NotStarted);
        };
        let Some(before) = day.journal.get(&update.intent_id) else {
            warn!(intent_id = %update.intent_id.short(), "execution update for unknown intent");
            let detail = format!("unknown intent {} ({:?})", update.intent_id, update.kind);
            self.emit(now, Severity::Warn, EventKind::UnknownExecutionUpdate { detail });
            return Ok(());
        };
        let role = before.intent.role;
        let applied = apply_update(&day.journal, update, now);
        let record = match applied {
            Ok(record) => record,
            Err(err) => {
                if let Some((price, quantity)) = late_fill(&before, update) {
                    error!(
                        intent_id = %update.intent_id.short(),
                        %role,
                        journaled = %before.state,
                        "fill for an intent already written off"
                    );
                    let kind = EventKind::LateFill {
                        role,
                        price,
                        quantity,
                        journaled: before.state,
                    };
                    let event = RobotEvent::new(day.trading_day, now, Severity::Error, kind)
                        .for_stream(&before.key.stream_id)
                        .with_intent(&update.intent_id);
                    self.events.emit(event);
                    let key = StreamKey::new(before.key.trading_day, before.key.stream_id.clone());
                    self.with_streams(now, &[key], |stream, ctx| stream.on_late_fill(role, ctx));
                    return Ok(());
                }
                let severity = match err {
                    JournalError::DuplicateBrokerOrderId { .. }
                    | JournalError::BrokerOrderIdChanged { .. } => Severity::Error,
                    _ => Severity::Warn,
                };
                warn!(intent_id = %update.intent_id.short(), %err, "execution update not applied");
                let event = RobotEvent::new(
                    day.trading_day,
                    now,
                    severity,
                    EventKind::UnknownExecutionUpdate { detail: err.to_string() },
                )
                .for_stream(&before.key.stream_id)
                .with_intent(&update.intent_id);
                self.events.emit(event);
                return Ok(());
            }
        };

        let kind = match &update.kind {
            UpdateKind::Acknowledged { broker_order_id } => {
                EventKind::OrderAcknowledged { broker_order_id: broker_order_id.clone() }
            }
            UpdateKind::PartiallyFilled { price, quantity } => {
                EventKind::OrderPartiallyFilled { price: *price, quantity: *quantity }
            }
            UpdateKind::Filled { price, quantity } => EventKind::OrderFilled {
                role,
                price: *price,
                quantity: *quantity,
            },
            UpdateKind::Rejected { reason } => EventKind::OrderRejected {
                role,
                reason: reason.clone(),
            },
            UpdateKind::Cancelled => EventKind::OrderCancelled { role },
        };
        let severity = if matches!(update.kind, UpdateKind::Rejected { .. }) {
            Severity::Warn
        } else {
            Severity::Info
        };
        let event = RobotEvent::new(day.trading_day, now, severity, kind)
            .for_stream(&record.key.stream_id)
            .with_intent(&update.intent_id);
        self.events.emit(event);

        let key = StreamKey::new(record.key.trading_day, record.key.stream_id.clone());
        self.with_streams(now, &[key], |stream, ctx| {
            stream.on_execution_update(update, &record, ctx)
        });
        Ok(())
    }

    pub fn on_connection_status(
        &mut self,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.day.is_none() {
            return Err(EngineError::NotStarted);
        }
        let severity = if status == ConnectionStatus::Connected {
            Severity::Info
        } else {
            Severity::Warn
        };
        self.emit(now, severity, EventKind::ConnectionStatusChanged { status });
        if let Some(t) = self.recovery.on_status(status) {
            self.emit_recovery(now, t);
        }
        if self.recovery.needs_sync() {
            self.run_sync(now);
        }
        Ok(())
    }

    pub fn on_feed_status(
        &mut self,
        instrument: &str,
        status: FeedStatus,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let day = self.day.as_mut().ok_or(EngineError::NotStarted)?;
        if day.feed.set_status(instrument, status) {
            let severity =
                if status == FeedStatus::Failed { Severity::Warn } else { Severity::Info };
            self.emit(
                now,
                severity,
                EventKind::FeedStatusChanged { instrument: instrument.to_string(), status },
            );
        }
        Ok(())
    }

    // ─── Operator controls ───

    /// Second step of live enablement. The phrase must be
    /// `ARM LIVE <trading day>`.
    pub fn arm_live(&mut self, phrase: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        let trading_day = self.trading_day().ok_or(EngineError::NotStarted)?;
        if self.config.execution_mode != ExecutionMode::Live || !self.config.live_enabled {
            return Err(EngineError::LiveNotEnabled);
        }
        let expected = format!("ARM LIVE {trading_day}");
        if phrase.trim() != expected {
            return Err(EngineError::ArmPhraseMismatch { expected });
        }
        self.live_armed = true;
        warn!(%trading_day, "live execution armed");
        self.emit(now, Severity::Warn, EventKind::LiveArmed);
        Ok(())
    }

    pub fn set_kill_switch(&mut self, enabled: bool, now: DateTime<Utc>) {
        self.kill_switch.set(enabled);
        self.poll_kill_switch(now);
    }

    // ─── Internals ───

    fn poll_kill_switch(&mut self, now: DateTime<Utc>) {
        let enabled = self.kill_switch.is_enabled();
        if enabled != self.kill_switch_seen {
            self.kill_switch_seen = enabled;
            let severity = if enabled { Severity::Warn } else { Severity::Info };
            self.emit(now, severity, EventKind::KillSwitchChanged { enabled });
        }
    }

    fn run_sync(&mut self, now: DateTime<Utc>) {
        let Some(day) = self.day.as_ref() else {
            return;
        };
        let outcome = match self.adapter.sync_state() {
            Ok(snapshot) => recovery::reconcile(&snapshot, |id| day.journal.known_intent(id)),
            Err(err) => SyncOutcome::Failed(err.to_string()),
        };
        if let Some(t) = self.recovery.on_sync(outcome) {
            self.emit_recovery(now, t);
        }
    }

    fn emit_recovery(&self, now: DateTime<Utc>, t: recovery::RecoveryTransition) {
        let severity = match t.to {
            RecoveryState::Healthy | RecoveryState::AwaitingSync => Severity::Info,
            RecoveryState::Disconnected => Severity::Warn,
            RecoveryState::SyncFailed => Severity::Error,
        };
        info!(from = %t.from, to = %t.to, detail = ?t.detail, "recovery state changed");
        self.emit(
            now,
            severity,
            EventKind::RecoveryStateChanged { from: t.from, to: t.to, detail: t.detail },
        );
    }

    fn emit(&self, now: DateTime<Utc>, severity: Severity, kind: EventKind) {
        if let Some(day) = &self.day {
            self.events.emit(RobotEvent::new(day.trading_day, now, severity, kind));
        }
    }

    fn emit_for(
        &self,
        now: DateTime<Utc>,
        stream_id: &StreamId,
        severity: Severity,
        kind: EventKind,
    ) {
        if let Some(day) = &self.day {
            let event = RobotEvent::new(day.trading_day, now, severity, kind).for_stream(stream_id);
            self.events.emit(event);
        }
    }

    /// Run `f` against each listed stream with a fresh context, inside the
    /// stream fault boundary.
    fn with_streams<F>(&mut self, now: DateTime<Utc>, keys: &[StreamKey], mut f: F)
    where
        F: FnMut(&mut StreamStateMachine, &StreamContext<'_>) -> Result<(), StreamError>,
    {
        let Some(day) = self.day.as_mut() else {
            return;
        };
        let env = GateEnv {
            locked_day: day.trading_day,
            recovery: self.recovery.state(),
            kill_switch_enabled: self.kill_switch.is_enabled(),
            timetable: day.timetable.as_ref(),
            expected_timezone: &self.config.timezone,
            mode: self.config.execution_mode,
            live_enabled: self.config.live_enabled,
            live_armed: self.live_armed,
        };
        let ctx = StreamContext {
            now,
            journal: &day.journal,
            adapter: self.adapter.as_ref(),
            bars: self.bars.as_ref(),
            gate: &self.gate,
            gate_env: &env,
            events: &self.events,
            time: &self.time,
            priority: self.config.same_bar_priority,
            bar_interval: self.config.bar_interval(),
        };
        for key in keys {
            if let Some(stream) = day.registry.get_mut(key) {
                run_guarded(stream, &ctx, &mut f);
            }
        }
    }
}

impl std::fmt::Debug for RobotEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotEngine")
            .field("trading_day", &self.trading_day())
            .field("recovery", &self.recovery.state())
            .field("live_armed", &self.live_armed)
            .finish_non_exhaustive()
    }
}

/// Price and quantity of a fill reported against a record the journal
/// already closed as rejected or cancelled.
fn late_fill(before: &JournalRecord, update: &ExecutionUpdate) -> Option<(f64, u32)> {
    if !matches!(before.state, JournalState::Rejected | JournalState::Cancelled) {
        return None;
    }
    match update.kind {
        UpdateKind::Filled { price, quantity }
        | UpdateKind::PartiallyFilled { price, quantity } => Some((price, quantity)),
        _ => None,
    }
}

fn apply_update(
    journal: &ExecutionJournal,
    update: &ExecutionUpdate,
    now: DateTime<Utc>,
) -> Result<JournalRecord, JournalError> {
    let id = &update.intent_id;
    match &update.kind {
        UpdateKind::Acknowledged { broker_order_id } => {
            journal.record_ack(id, broker_order_id, now)
        }
        UpdateKind::PartiallyFilled { price, quantity } => {
            journal.record_partial_fill(id, *price, *quantity, now)
        }
        UpdateKind::Filled { price, quantity } => {
            journal.record_terminal(
                id,
                TerminalOutcome::Filled { price: *price, quantity: *quantity },
                now,
            )
        }
        UpdateKind::Rejected { reason } => {
            journal.record_terminal(id, TerminalOutcome::Rejected { reason: reason.clone() }, now)
        }
        UpdateKind::Cancelled => journal.record_terminal(id, TerminalOutcome::Cancelled, now),
    }
}

/// Stream fault boundary: errors stand the stream down (flattening if
/// exposed); panics abort it without further broker calls.
fn run_guarded<F>(stream: &mut StreamStateMachine, ctx: &StreamContext<'_>, f: &mut F)
where
    F: FnMut(&mut StreamStateMachine, &StreamContext<'_>) -> Result<(), StreamError>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *stream, ctx)));
    let (message, panicked) = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => (err.to_string(), false),
        Err(payload) => (panic_message(payload.as_ref()), true),
    };
    error!(stream_id = %stream.stream_id(), %message, panicked, "stream fault");
    let event = RobotEvent::new(
        ctx.journal.trading_day(),
        ctx.now,
        Severity::Error,
        EventKind::StreamFault { message: message.clone() },
    )
    .for_stream(stream.stream_id());
    ctx.events.emit(event);
    if panicked {
        stream.abort(&format!("panic: {message}"), ctx);
    } else {
        stream.stand_down(&message, ctx);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
