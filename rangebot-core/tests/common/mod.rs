//! Shared fixtures for the core integration tests.
//!
//! All times are Chicago wall-clock on 2025-12-01 (CST, UTC-6). Session S1:
//! range 02:00, flatten 15:55, close 16:00. ES tick 0.25, target 10 points.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rangebot_core::config::{EngineConfig, ExecutionMode, InstrumentSpec, SessionSpec};
use rangebot_core::domain::{
    Bar, ExecutionUpdate, OrderRequest, OrderRole, StreamId, TradingDay, UpdateKind,
};
use rangebot_core::engine::{EngineDeps, RobotEngine};
use rangebot_core::events::{EventKind, MemorySink, RobotEvent};
use rangebot_core::journal::MemoryJournalStore;
use rangebot_core::risk::KillSwitch;
use rangebot_core::stream::exit::SameBarPriority;
use rangebot_core::stream::gap::GapThresholds;
use rangebot_core::stream::StreamState;
use rangebot_core::testkit::{RecordingAdapter, StaticBars};
use rangebot_core::time::LocalTime;
use rangebot_core::timetable::{StreamDirective, Timetable};

// ─── Helpers ───

pub fn day() -> TradingDay {
    TradingDay::from_ymd(2025, 12, 1).unwrap()
}

/// UTC instant for a Chicago wall-clock time on the test day.
pub fn local(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 1, h + 6, m, 0).unwrap()
}

pub fn bar(h: u32, m: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar::new(local(h, m), open, high, low, close)
}

pub fn es_config() -> EngineConfig {
    let mut instruments = BTreeMap::new();
    instruments.insert(
        "ES".to_string(),
        InstrumentSpec {
            tick_size: 0.25,
            quantity: 1,
            target_points: 10.0,
            stop_cap_multiple: 1.0,
        },
    );
    let mut sessions = BTreeMap::new();
    sessions.insert(
        "S1".to_string(),
        SessionSpec {
            range_start: LocalTime::new(2, 0).unwrap(),
            market_close: LocalTime::new(16, 0).unwrap(),
            flatten_time: LocalTime::new(15, 55).unwrap(),
        },
    );
    EngineConfig {
        timezone: "America/Chicago".into(),
        rollover_hour: 17,
        execution_mode: ExecutionMode::Sim,
        live_enabled: false,
        same_bar_priority: SameBarPriority::StopFirst,
        bar_interval_secs: 60,
        gap: GapThresholds::default(),
        break_even_trigger_fraction: 0.65,
        instruments,
        sessions,
    }
}

pub fn directive(id: &str, h: u32, m: u32) -> StreamDirective {
    StreamDirective {
        stream_id: StreamId::new(id),
        instrument: "ES".into(),
        session_id: "S1".into(),
        decision_time: LocalTime::new(h, m).unwrap(),
        enabled: true,
        block_reason: None,
    }
}

pub fn timetable(streams: Vec<StreamDirective>) -> Timetable {
    Timetable { schema_version: 1, trading_day: day(), timezone: "America/Chicago".into(), streams }
}

pub struct Harness {
    pub engine: RobotEngine,
    pub adapter: Arc<RecordingAdapter>,
    pub bars: Arc<StaticBars>,
    pub store: Arc<MemoryJournalStore>,
    pub sink: Arc<MemorySink>,
    pub kill_switch: KillSwitch,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(es_config(), Arc::new(MemoryJournalStore::new()))
    }

    pub fn build(config: EngineConfig, store: Arc<MemoryJournalStore>) -> Self {
        let adapter = Arc::new(RecordingAdapter::new());
        let bars = Arc::new(StaticBars::new());
        let sink = Arc::new(MemorySink::new());
        let kill_switch = KillSwitch::new();
        let deps = EngineDeps {
            adapter: adapter.clone(),
            bars: bars.clone(),
            store: store.clone(),
            events: sink.clone(),
            kill_switch: kill_switch.clone(),
        };
        let engine = RobotEngine::new(config, deps).unwrap();
        Self { engine, adapter, bars, store, sink, kill_switch }
    }

    /// Lock the day at 01:00 and load ES1 deciding at 07:30.
    pub fn start(&mut self) {
        self.start_with(vec![directive("ES1", 7, 30)], local(1, 0));
    }

    pub fn start_with(&mut self, streams: Vec<StreamDirective>, at: DateTime<Utc>) {
        self.engine.start(at).unwrap();
        self.engine.load_timetable(&timetable(streams), at).unwrap();
    }

    /// Range 4995.00 .. 5005.00, last close 5000.00, locked at 07:30.
    pub fn build_range(&mut self) {
        self.bar(bar(2, 0, 5000.0, 5005.0, 4996.0, 5001.0));
        self.bar(bar(5, 0, 5001.0, 5003.0, 4995.0, 4999.0));
        self.bar(bar(7, 29, 4999.0, 5002.0, 4998.0, 5000.0));
    }

    /// Range, breakout long at 5005.25 on the 07:30 bar.
    pub fn enter_long(&mut self) {
        self.build_range();
        self.bar(bar(7, 30, 5004.0, 5005.5, 5003.0, 5005.25));
    }

    /// Breakout long, entry filled at the level.
    pub fn in_position_long(&mut self) {
        self.enter_long();
        self.fill(OrderRole::Entry, 5005.25, local(7, 31));
    }

    pub fn bar(&mut self, bar: Bar) {
        self.engine.on_bar("ES", &bar).unwrap();
    }

    pub fn tick(&mut self, h: u32, m: u32) {
        self.engine.on_tick(local(h, m)).unwrap();
    }

    pub fn last_call(&self, role: OrderRole) -> OrderRequest {
        self.adapter.calls_for(role).last().cloned().unwrap()
    }

    pub fn fill(&mut self, role: OrderRole, price: f64, at: DateTime<Utc>) {
        let request = self.last_call(role);
        let update = ExecutionUpdate::new(
            request.intent_id,
            UpdateKind::Filled { price, quantity: request.quantity },
        );
        self.engine.on_execution_update(&update, at).unwrap();
    }

    pub fn state(&self, id: &str) -> StreamState {
        self.engine.stream_state(&StreamId::new(id)).unwrap()
    }

    pub fn count(&self, name: &str) -> usize {
        self.sink.count(name)
    }

    pub fn events_named(&self, name: &str) -> Vec<RobotEvent> {
        self.sink.events().into_iter().filter(|e| e.kind.name() == name).collect()
    }

    pub fn roles_called(&self) -> Vec<OrderRole> {
        self.adapter.calls().iter().map(|r| r.role).collect()
    }

    pub fn first(&self, name: &str) -> EventKind {
        self.events_named(name).into_iter().next().map(|e| e.kind).unwrap()
    }
}
