//! Deterministic replay of one trading day against the paper adapter.
//!
//! Per bar, in timestamp order across instruments:
//! 1. the paper broker resolves orders that were working before the bar
//! 2. the engine sees the bar
//! 3. queued fills and cancels are fed back to the engine (at the bar close)
//! 4. the engine ticks at the bar close, then updates are pumped again
//!
//! After the last bar the engine ticks at the latest session close so
//! cutoffs fire even when the data ends early. Replaying the same day again
//! against the same journal resubmits nothing.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use rangebot_core::adapter::BarProvider;
use rangebot_core::config::EngineConfig;
use rangebot_core::domain::{Bar, TradingDay};
use rangebot_core::engine::{EngineDeps, EngineError, EngineSummary, RobotEngine};
use rangebot_core::events::EventSink;
use rangebot_core::journal::JournalStore;
use rangebot_core::risk::KillSwitch;
use rangebot_core::time::TimeService;
use rangebot_core::timetable::Timetable;

use crate::paper::PaperAdapter;

/// Upper bound on update/engine round trips per pump.
const MAX_PUMP_ROUNDS: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Engine start instant. Defaults to the first bar of the day.
    pub start: Option<DateTime<Utc>>,
    /// Close and archive the day once every stream is done.
    pub archive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub trading_day: TradingDay,
    pub bars_replayed: usize,
    pub updates_applied: usize,
    pub archived: bool,
    pub summary: EngineSummary,
}

/// Replay `timetable.trading_day` from `bars`.
pub fn replay_day(
    config: EngineConfig,
    timetable: &Timetable,
    bars: Arc<dyn BarProvider>,
    store: Arc<dyn JournalStore>,
    events: Arc<dyn EventSink>,
    options: ReplayOptions,
) -> Result<ReplayReport> {
    let day = timetable.trading_day;
    let time = config.time_service().context("invalid engine config")?;
    let paper = Arc::new(PaperAdapter::new(config.same_bar_priority));
    let closes: Vec<_> = config.sessions.values().map(|s| s.market_close).collect();

    let instruments: BTreeSet<&str> =
        timetable.streams.iter().map(|d| d.instrument.as_str()).collect();
    let tape = day_tape(&time, day, &instruments, bars.as_ref())?;
    if tape.is_empty() {
        warn!(%day, "no bars for trading day");
    }

    let start = match options.start.or_else(|| tape.first().map(|(_, b)| b.timestamp)) {
        Some(start) => start,
        None => bail!("no bars for {day} and no start instant given"),
    };
    if time.trading_day_of(start) != day {
        bail!("start {start} falls on trading day {}, not {day}", time.trading_day_of(start));
    }

    let deps = EngineDeps {
        adapter: paper.clone(),
        bars,
        store,
        events,
        kill_switch: KillSwitch::new(),
    };
    let mut engine = RobotEngine::new(config, deps)?;
    engine.start(start)?;
    let outcome = engine.load_timetable(timetable, start)?;
    info!(
        %day,
        created = outcome.created.len(),
        restored = outcome.restored.len(),
        rejected = outcome.rejected.len(),
        bars = tape.len(),
        "replay started"
    );

    let interval = engine.config().bar_interval();
    let mut updates_applied = 0;
    for (instrument, bar) in &tape {
        let close = bar.timestamp + interval;
        paper.on_bar(instrument, bar);
        log_failure(engine.on_bar(instrument, bar));
        updates_applied += pump(&mut engine, &paper, close);
        log_failure(engine.on_tick(close));
        updates_applied += pump(&mut engine, &paper, close);
    }

    let mut end = tape.last().map_or(start, |(_, b)| b.timestamp + interval);
    for close in closes {
        end = end.max(time.local_time_to_utc(day, close)?);
    }
    log_failure(engine.on_tick(end));
    updates_applied += pump(&mut engine, &paper, end);

    let mut archived = false;
    let summary = if options.archive {
        match engine.close_day(end) {
            Ok(summary) => {
                archived = true;
                summary
            }
            Err(EngineError::StreamsActive(n)) => {
                warn!(%day, active = n, "streams still active; day not archived");
                engine.summary()?
            }
            Err(err) => return Err(err.into()),
        }
    } else {
        engine.summary()?
    };

    info!(
        %day,
        bars = tape.len(),
        updates_applied,
        outcomes = ?summary.outcomes(),
        "replay finished"
    );
    Ok(ReplayReport {
        trading_day: day,
        bars_replayed: tape.len(),
        updates_applied,
        archived,
        summary,
    })
}

/// Every bar of the trading day for the given instruments, merged in
/// timestamp order. Ties keep instrument name order.
fn day_tape(
    time: &TimeService,
    day: TradingDay,
    instruments: &BTreeSet<&str>,
    bars: &dyn BarProvider,
) -> Result<Vec<(String, Bar)>> {
    let Some(midnight) = day.date().and_hms_opt(0, 0, 0) else {
        bail!("cannot build window for {day}");
    };
    let from = midnight.and_utc() - Duration::days(2);
    let to = midnight.and_utc() + Duration::days(2);

    let mut tape = Vec::new();
    for &instrument in instruments {
        let fetched = bars
            .get_bars(instrument, from, to)
            .with_context(|| format!("failed to load bars for {instrument}"))?;
        let before = tape.len();
        tape.extend(
            fetched
                .into_iter()
                .filter(|b| time.trading_day_of(b.timestamp) == day)
                .map(|b| (instrument.to_string(), b)),
        );
        debug!(instrument, bars = tape.len() - before, "bars selected for replay");
    }
    tape.sort_by_key(|(_, b)| b.timestamp);
    Ok(tape)
}

fn pump(engine: &mut RobotEngine, paper: &PaperAdapter, now: DateTime<Utc>) -> usize {
    let mut applied = 0;
    for _ in 0..MAX_PUMP_ROUNDS {
        let updates = paper.take_updates();
        if updates.is_empty() {
            return applied;
        }
        for update in &updates {
            log_failure(engine.on_execution_update(update, now));
            applied += 1;
        }
    }
    warn!(rounds = MAX_PUMP_ROUNDS, "paper updates still pending after pump limit");
    applied
}

fn log_failure(result: Result<(), EngineError>) {
    if let Err(err) = result {
        warn!(%err, "engine call failed during replay");
    }
}
