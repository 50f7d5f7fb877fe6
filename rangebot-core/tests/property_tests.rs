//! Property tests for the decision core.
//!
//! Uses proptest to verify:
//! 1. Intent ids are stable under sub-tick noise and change with any tick
//! 2. No two distinct canonical intents share an id (seeded sweep)
//! 3. Breakout levels sit strictly outside the range, on the tick grid
//! 4. Bracket geometry: stop on the losing side, target on the winning side
//! 5. Trading-day mapping round-trips across DST for session hours
//! 6. Exit resolution is deterministic and honours the priority
//! 7. The break-even watcher fires at most once
//! 8. Quiet gaps never invalidate

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rangebot_core::config::InstrumentSpec;
use rangebot_core::domain::{
    Bar, Direction, Instrument, IntentTemplate, OrderRole, StreamId, TradingDay,
};
use rangebot_core::stream::bracket::BracketLevels;
use rangebot_core::stream::breakeven::BreakEvenWatcher;
use rangebot_core::stream::exit::{resolve_bar, ExitHit, SameBarPriority};
use rangebot_core::stream::gap::{GapThresholds, GapTracker, GapVerdict};
use rangebot_core::stream::range::{BreakoutLevels, RangeWindow};
use rangebot_core::time::{LocalTime, TimeService};

// ── Strategies (proptest) ────────────────────────────────────────────

fn es() -> Instrument {
    Instrument::new("ES", 0.25).unwrap()
}

fn es_spec() -> InstrumentSpec {
    InstrumentSpec { tick_size: 0.25, quantity: 1, target_points: 10.0, stop_cap_multiple: 1.0 }
}

fn arb_ticks() -> impl Strategy<Value = i64> {
    16_000i64..24_000
}

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Long), Just(Direction::Short)]
}

fn arb_priority() -> impl Strategy<Value = SameBarPriority> {
    prop_oneof![Just(SameBarPriority::StopFirst), Just(SameBarPriority::TargetFirst)]
}

fn template(stream: &str, direction: Direction, entry: f64) -> IntentTemplate {
    IntentTemplate {
        trading_day: TradingDay::from_ymd(2025, 12, 1).unwrap(),
        stream_id: StreamId::new(stream),
        instrument: es(),
        direction,
        quantity: 1,
        entry_price: entry,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 1, 13, 30, 0).unwrap()
}

fn bar_from(open: i64, up: i64, down: i64, close_off: i64) -> Bar {
    let tick = 0.25;
    let high = (open + up) as f64 * tick;
    let low = (open - down) as f64 * tick;
    let close = ((open + close_off).clamp(open - down, open + up)) as f64 * tick;
    Bar::new(t0(), open as f64 * tick, high, low, close)
}

// ── 1. Intent id stability ───────────────────────────────────────────

proptest! {
    /// Prices that land on the same tick hash to the same id.
    #[test]
    fn intent_id_ignores_sub_tick_noise(
        ticks in arb_ticks(),
        noise in -1e-7..1e-7_f64,
        dir in arb_direction(),
    ) {
        let price = ticks as f64 * 0.25;
        let clean = template("ES1", dir, price).entry(price - 10.0, price + 10.0);
        let noisy = template("ES1", dir, price + noise).entry(
            price - 10.0 + noise,
            price + 10.0 - noise,
        );
        prop_assert_eq!(clean.intent_id(), noisy.intent_id());
    }

    /// A one-tick move in any price changes the id.
    #[test]
    fn intent_id_changes_with_one_tick(ticks in arb_ticks(), dir in arb_direction()) {
        let price = ticks as f64 * 0.25;
        let base = template("ES1", dir, price).entry(price - 10.0, price + 10.0);
        let moved = template("ES1", dir, price + 0.25).entry(price - 10.0, price + 10.0);
        let stop_moved = template("ES1", dir, price).entry(price - 10.25, price + 10.0);
        prop_assert_ne!(base.intent_id(), moved.intent_id());
        prop_assert_ne!(base.intent_id(), stop_moved.intent_id());
    }
}

// ── 2. Collision sweep ───────────────────────────────────────────────

#[test]
fn no_id_collisions_across_random_intents() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut seen: HashMap<String, String> = HashMap::new();
    let roles = [
        OrderRole::Entry,
        OrderRole::ProtectiveStop,
        OrderRole::Target,
        OrderRole::BreakEvenStop,
        OrderRole::Flatten,
    ];

    for _ in 0..5_000 {
        let stream = format!("ES{}", rng.gen_range(1..=20));
        let direction = if rng.gen_bool(0.5) { Direction::Long } else { Direction::Short };
        let entry = rng.gen_range(16_000i64..24_000) as f64 * 0.25;
        let t = template(&stream, direction, entry);
        let intent = match roles[rng.gen_range(0..roles.len())] {
            OrderRole::Entry => t.entry(entry - 10.0, entry + 10.0),
            OrderRole::ProtectiveStop => {
                t.protective_stop(entry - rng.gen_range(1i64..80) as f64 * 0.25)
            }
            OrderRole::Target => t.target(entry + 10.0),
            OrderRole::BreakEvenStop => t.break_even(entry + 0.25),
            OrderRole::Flatten => t.flatten(),
        };
        let canonical = intent.canonical_fields().to_string();
        let id = intent.intent_id().as_str().to_string();
        if let Some(previous) = seen.insert(id.clone(), canonical.clone()) {
            assert_eq!(previous, canonical, "id {id} shared by distinct intents");
        }
    }
}

// ── 3. Breakout levels ───────────────────────────────────────────────

proptest! {
    #[test]
    fn breakout_levels_sit_outside_range(low in arb_ticks(), width in 0i64..400) {
        let window = RangeWindow {
            start: t0(),
            end: t0() + Duration::hours(5),
            high: (low + width) as f64 * 0.25,
            low: low as f64 * 0.25,
        };
        let levels = BreakoutLevels::from_range(&window, &es());
        prop_assert!(levels.long > window.high);
        prop_assert!(levels.short < window.low);
        prop_assert!(es().is_tick_aligned(levels.long));
        prop_assert!(es().is_tick_aligned(levels.short));
        prop_assert_eq!(levels.immediate((window.high + window.low) / 2.0), None);
    }
}

// ── 4. Bracket geometry ──────────────────────────────────────────────

proptest! {
    #[test]
    fn bracket_sides_follow_direction(
        entry in arb_ticks(),
        range in 0i64..200,
        fraction in 0.05..=1.0_f64,
        dir in arb_direction(),
    ) {
        let entry = entry as f64 * 0.25;
        let b = BracketLevels::build(dir, entry, range as f64 * 0.25, &es_spec(), fraction, &es());
        let sign = dir.sign();
        prop_assert!((b.target - b.entry) * sign > 0.0);
        prop_assert!((b.entry - b.stop) * sign > 0.0);
        prop_assert!((b.be_trigger - b.entry) * sign >= 0.0);
        prop_assert!((b.target - b.be_trigger) * sign >= 0.0);
        prop_assert_eq!(b.be_stop, entry + sign * 0.25);
        for price in [b.entry, b.stop, b.target, b.be_trigger, b.be_stop] {
            prop_assert!(es().is_tick_aligned(price));
        }
        // Stop distance never exceeds the cap (one target distance).
        prop_assert!((b.entry - b.stop).abs() <= 10.0 + 1e-9);
    }
}

// ── 5. Trading-day mapping ───────────────────────────────────────────

proptest! {
    #[test]
    fn session_hours_map_back_to_their_day(
        offset in 0i64..1_095,
        hour in 3u32..17,
        minute in 0u32..60,
    ) {
        let time = TimeService::from_name("America/Chicago", 17).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset);
        let day = TradingDay::new(date);
        let local = LocalTime::new(hour, minute).unwrap();
        let utc = time.local_time_to_utc(day, local).unwrap();
        prop_assert_eq!(time.trading_day_of(utc), day);
        let back = time.utc_to_local(utc);
        prop_assert_eq!(back.date_naive(), date);
    }

    #[test]
    fn evening_hours_roll_to_next_day(offset in 0i64..1_095, hour in 17u32..24) {
        let time = TimeService::from_name("America/Chicago", 17).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset);
        let utc = time.local_time_to_utc(
            TradingDay::new(date),
            LocalTime::new(hour, 0).unwrap(),
        )
        .unwrap();
        prop_assert_eq!(time.trading_day_of(utc), TradingDay::new(date + Duration::days(1)));
    }
}

// ── 6. Exit resolution ───────────────────────────────────────────────

proptest! {
    #[test]
    fn exit_resolution_is_deterministic(
        open in arb_ticks(),
        up in 0i64..80,
        down in 0i64..80,
        close_off in -80i64..80,
        dir in arb_direction(),
        priority in arb_priority(),
    ) {
        let bar = bar_from(open, up, down, close_off);
        let entry = open as f64 * 0.25;
        let stop = entry - dir.sign() * 10.0;
        let target = entry + dir.sign() * 10.0;
        let first = resolve_bar(&bar, dir, stop, target, priority);
        for _ in 0..3 {
            prop_assert_eq!(resolve_bar(&bar, dir, stop, target, priority), first);
        }
        let both = up >= 40 && down >= 40;
        if both {
            let expected = match priority {
                SameBarPriority::StopFirst => ExitHit::Stop { price: stop },
                SameBarPriority::TargetFirst => ExitHit::Target { price: target },
            };
            prop_assert_eq!(first, Some(expected));
        }
    }
}

// ── 7. Break-even fires once ─────────────────────────────────────────

proptest! {
    #[test]
    fn break_even_fires_at_most_once(
        moves in prop::collection::vec((0i64..60, 0i64..60), 1..60),
        dir in arb_direction(),
    ) {
        let entry = 20_000i64;
        let bracket = BracketLevels::build(dir, entry as f64 * 0.25, 10.0, &es_spec(), 0.65, &es());
        let mut watcher = BreakEvenWatcher::new(&bracket);
        let mut fired = 0;
        for (up, down) in moves {
            let bar = bar_from(entry, up, down, 0);
            if let Some(stop) = watcher.observe(&bar) {
                prop_assert_eq!(stop, bracket.be_stop);
                fired += 1;
            }
        }
        prop_assert!(fired <= 1);
        prop_assert_eq!(fired == 1, watcher.has_fired());
    }
}

// ── 8. Quiet gaps ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn quiet_gaps_never_exceed(steps in prop::collection::vec(1i64..240, 1..100)) {
        let mut tracker = GapTracker::new(GapThresholds::default());
        let mut at = t0();
        for minutes in steps {
            let next = at + Duration::minutes(minutes);
            prop_assert_eq!(tracker.observe(at, next, Duration::minutes(1), false), GapVerdict::Ok);
            at = next;
        }
        prop_assert_eq!(tracker.total(), Duration::zero());
    }
}
