//! Opening-range accumulation and breakout levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Direction, Instrument};

/// The frozen `[start, end)` window and its extremes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
}

impl RangeWindow {
    pub fn size(&self) -> f64 {
        self.high - self.low
    }
}

/// Breakout levels one tick outside the range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakoutLevels {
    pub long: f64,
    pub short: f64,
}

impl BreakoutLevels {
    pub fn from_range(window: &RangeWindow, instrument: &Instrument) -> Self {
        Self {
            long: instrument.round_to_tick(window.high + instrument.tick_size),
            short: instrument.round_to_tick(window.low - instrument.tick_size),
        }
    }

    /// Breakout decided by the close at lock time, if it is already outside.
    pub fn immediate(&self, close_at_lock: f64) -> Option<Direction> {
        if close_at_lock >= self.long {
            Some(Direction::Long)
        } else if close_at_lock <= self.short {
            Some(Direction::Short)
        } else {
            None
        }
    }

    /// First-touch breakout for one bar.
    ///
    /// When a bar touches both levels: a bar opening beyond a level takes
    /// that side; otherwise the level nearer the open wins, ties go long.
    pub fn detect(&self, bar: &Bar) -> Option<Direction> {
        let long_hit = bar.high >= self.long;
        let short_hit = bar.low <= self.short;
        match (long_hit, short_hit) {
            (true, false) => Some(Direction::Long),
            (false, true) => Some(Direction::Short),
            (false, false) => None,
            (true, true) => {
                if bar.open >= self.long {
                    Some(Direction::Long)
                } else if bar.open <= self.short {
                    Some(Direction::Short)
                } else if (self.long - bar.open) <= (bar.open - self.short) {
                    Some(Direction::Long)
                } else {
                    Some(Direction::Short)
                }
            }
        }
    }

    pub fn level(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.long,
            Direction::Short => self.short,
        }
    }
}

/// A range frozen at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockedRange {
    pub window: RangeWindow,
    pub levels: BreakoutLevels,
    pub close_at_lock: f64,
    pub bar_count: usize,
}

/// Bars seen since the window opened. Extremes are computed at lock time
/// from the retained bars, so a decision-time change before lock is honoured
/// exactly. `close_at_lock` is the close of the latest bar seen, which can
/// lie past the window end when the stream catches up late.
#[derive(Debug, Clone, Default)]
pub struct RangeAccumulator {
    bars: Vec<Bar>,
}

impl RangeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a bar if it opens at or after `start`. Duplicate timestamps are
    /// ignored.
    pub fn add(&mut self, bar: &Bar, start: DateTime<Utc>) {
        if bar.timestamp < start {
            return;
        }
        if self.bars.last().is_some_and(|last| bar.timestamp <= last.timestamp) {
            return;
        }
        self.bars.push(bar.clone());
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Freeze `[start, end)`. `None` if no bar fell inside the window.
    pub fn lock(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        instrument: &Instrument,
    ) -> Option<LockedRange> {
        let mut high = f64::NEG_INFINITY;
        let mut low = f64::INFINITY;
        let mut count = 0;
        for bar in self.bars.iter().filter(|b| b.timestamp >= start && b.timestamp < end) {
            high = high.max(bar.high);
            low = low.min(bar.low);
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let close_at_lock = self.bars.last()?.close;
        let window = RangeWindow { start, end, high, low };
        Some(LockedRange {
            window,
            levels: BreakoutLevels::from_range(&window, instrument),
            close_at_lock,
            bar_count: count,
        })
    }
}
