//! Bracket geometry for the single trade of a stream.

use serde::{Deserialize, Serialize};

use crate::config::InstrumentSpec;
use crate::domain::{Direction, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BracketLevels {
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    /// Favourable price at which the stop moves to break-even.
    pub be_trigger: f64,
    /// Stop price after the break-even move (entry plus one tick in profit).
    pub be_stop: f64,
}

impl BracketLevels {
    /// Build the bracket around `entry`.
    ///
    /// target = entry ± target_points; stop = entry ∓ min(range_size,
    /// cap × target_points), at least one tick. All levels tick-rounded.
    pub fn build(
        direction: Direction,
        entry: f64,
        range_size: f64,
        spec: &InstrumentSpec,
        be_trigger_fraction: f64,
        instrument: &Instrument,
    ) -> Self {
        let entry = instrument.round_to_tick(entry);
        let target_distance = instrument
            .round_to_tick(spec.target_points)
            .max(instrument.tick_size);
        let cap = spec.stop_cap_multiple * spec.target_points;
        let stop_distance = instrument.round_to_tick(range_size.min(cap)).max(instrument.tick_size);
        let sign = direction.sign();

        let target = instrument.round_to_tick(entry + sign * target_distance);
        let stop = instrument.round_to_tick(entry - sign * stop_distance);
        let be_trigger =
            instrument.round_to_tick(entry + sign * be_trigger_fraction * target_distance);
        let be_stop = instrument.offset_ticks(entry, sign as i64);

        Self { direction, entry, stop, target, be_trigger, be_stop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> InstrumentSpec {
        InstrumentSpec { tick_size: 0.25, quantity: 1, target_points: 10.0, stop_cap_multiple: 1.0 }
    }

    fn es() -> Instrument {
        Instrument::new("ES", 0.25).unwrap()
    }

    #[test]
    fn long_bracket_uses_range_when_below_cap() {
        let b = BracketLevels::build(Direction::Long, 5005.25, 8.0, &spec(), 0.65, &es());
        assert_eq!(b.target, 5015.25);
        assert_eq!(b.stop, 4997.25);
        assert_eq!(b.be_trigger, 5011.75);
        assert_eq!(b.be_stop, 5005.50);
    }

    #[test]
    fn stop_distance_is_capped() {
        let b = BracketLevels::build(Direction::Short, 4994.75, 25.0, &spec(), 0.5, &es());
        assert_eq!(b.target, 4984.75);
        assert_eq!(b.stop, 5004.75);
        assert_eq!(b.be_trigger, 4989.75);
        assert_eq!(b.be_stop, 4994.50);
    }

    #[test]
    fn zero_range_widens_stop_to_one_tick() {
        let b = BracketLevels::build(Direction::Long, 5000.0, 0.0, &spec(), 0.5, &es());
        assert_eq!(b.stop, 4999.75);
    }
}
