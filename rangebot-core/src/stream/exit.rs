//! Same-bar exit resolution shared by the stream model and paper fills.
//!
//! A bar can touch both the stop and the target. Intrabar order is unknown,
//! so one global priority decides:
//! - StopFirst: assume the adverse extreme came first (conservative)
//! - TargetFirst: assume the favourable extreme came first

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Direction, OrderRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameBarPriority {
    #[default]
    StopFirst,
    TargetFirst,
}

/// Which protective level a bar reaches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExitHit {
    Stop { price: f64 },
    Target { price: f64 },
}

impl ExitHit {
    pub fn price(&self) -> f64 {
        match self {
            ExitHit::Stop { price } | ExitHit::Target { price } => *price,
        }
    }

    /// Order role that would fill for this hit.
    pub fn role(&self, break_even_applied: bool) -> OrderRole {
        match self {
            ExitHit::Stop { .. } if break_even_applied => OrderRole::BreakEvenStop,
            ExitHit::Stop { .. } => OrderRole::ProtectiveStop,
            ExitHit::Target { .. } => OrderRole::Target,
        }
    }
}

pub fn stop_touched(bar: &Bar, direction: Direction, stop: f64) -> bool {
    match direction {
        Direction::Long => bar.low <= stop,
        Direction::Short => bar.high >= stop,
    }
}

pub fn target_touched(bar: &Bar, direction: Direction, target: f64) -> bool {
    match direction {
        Direction::Long => bar.high >= target,
        Direction::Short => bar.low <= target,
    }
}

/// Resolve one bar against a position's stop and target.
pub fn resolve_bar(
    bar: &Bar,
    direction: Direction,
    stop: f64,
    target: f64,
    priority: SameBarPriority,
) -> Option<ExitHit> {
    let stop_hit = stop_touched(bar, direction, stop);
    let target_hit = target_touched(bar, direction, target);
    match (stop_hit, target_hit) {
        (false, false) => None,
        (true, false) => Some(ExitHit::Stop { price: stop }),
        (false, true) => Some(ExitHit::Target { price: target }),
        (true, true) => match priority {
            SameBarPriority::StopFirst => Some(ExitHit::Stop { price: stop }),
            SameBarPriority::TargetFirst => Some(ExitHit::Target { price: target }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(Utc.with_ymd_and_hms(2025, 12, 1, 15, 0, 0).unwrap(), open, high, low, close)
    }

    #[test]
    fn single_level_hits() {
        let b = bar(5006.0, 5016.0, 5004.0, 5015.0);
        assert_eq!(
            resolve_bar(&b, Direction::Long, 4997.25, 5015.25, SameBarPriority::StopFirst),
            Some(ExitHit::Target { price: 5015.25 })
        );
        let b = bar(5006.0, 5007.0, 4997.0, 4998.0);
        assert_eq!(
            resolve_bar(&b, Direction::Long, 4997.25, 5015.25, SameBarPriority::TargetFirst),
            Some(ExitHit::Stop { price: 4997.25 })
        );
    }

    #[test]
    fn both_levels_follow_priority() {
        // target touched at the open, stop inside the range
        let b = bar(5015.25, 5016.0, 4997.0, 5000.0);
        assert_eq!(
            resolve_bar(&b, Direction::Long, 4997.25, 5015.25, SameBarPriority::StopFirst),
            Some(ExitHit::Stop { price: 4997.25 })
        );
        assert_eq!(
            resolve_bar(&b, Direction::Long, 4997.25, 5015.25, SameBarPriority::TargetFirst),
            Some(ExitHit::Target { price: 5015.25 })
        );
    }

    #[test]
    fn short_side_mirrors_long() {
        let b = bar(4990.0, 5005.0, 4984.0, 4990.0);
        assert_eq!(
            resolve_bar(&b, Direction::Short, 5004.75, 4984.75, SameBarPriority::StopFirst),
            Some(ExitHit::Stop { price: 5004.75 })
        );
        assert_eq!(ExitHit::Stop { price: 1.0 }.role(true), OrderRole::BreakEvenStop);
    }
}
