//! Feed-gap tracking. Only gaps that coincide with a reported feed failure
//! count; quiet markets with missing bars do not.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapThresholds {
    /// Largest tolerated single failure gap, in minutes.
    pub max_single_gap_minutes: i64,
    /// Largest tolerated sum of failure gaps over the stream's life, in minutes.
    pub max_total_gap_minutes: i64,
}

impl Default for GapThresholds {
    fn default() -> Self {
        Self { max_single_gap_minutes: 3, max_total_gap_minutes: 6 }
    }
}

impl GapThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_single_gap_minutes <= 0 || self.max_total_gap_minutes <= 0 {
            return Err("gap thresholds must be positive".into());
        }
        if self.max_total_gap_minutes < self.max_single_gap_minutes {
            return Err("max_total_gap_minutes must be >= max_single_gap_minutes".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GapVerdict {
    Ok,
    Exceeded { reason: String },
}

#[derive(Debug, Clone)]
pub struct GapTracker {
    thresholds: GapThresholds,
    total: Duration,
    largest: Duration,
}

impl GapTracker {
    pub fn new(thresholds: GapThresholds) -> Self {
        Self { thresholds, total: Duration::zero(), largest: Duration::zero() }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    /// Account for the step from `previous` to `current`. The missing span is
    /// the time between the bars minus one bar interval.
    pub fn observe(
        &mut self,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
        bar_interval: Duration,
        feed_failed: bool,
    ) -> GapVerdict {
        let missing = current - previous - bar_interval;
        if !feed_failed || missing <= Duration::zero() {
            return GapVerdict::Ok;
        }
        self.total = self.total + missing;
        if missing > self.largest {
            self.largest = missing;
        }
        if missing > Duration::minutes(self.thresholds.max_single_gap_minutes) {
            return GapVerdict::Exceeded {
                reason: format!(
                    "feed-failure gap of {}m exceeds single-gap limit {}m",
                    missing.num_minutes(),
                    self.thresholds.max_single_gap_minutes
                ),
            };
        }
        if self.total > Duration::minutes(self.thresholds.max_total_gap_minutes) {
            return GapVerdict::Exceeded {
                reason: format!(
                    "cumulative feed-failure gaps of {}m exceed limit {}m",
                    self.total.num_minutes(),
                    self.thresholds.max_total_gap_minutes
                ),
            };
        }
        GapVerdict::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 14, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn quiet_market_gaps_are_ignored() {
        let mut tracker = GapTracker::new(GapThresholds::default());
        assert_eq!(tracker.observe(t(0), t(30), Duration::minutes(1), false), GapVerdict::Ok);
        assert_eq!(tracker.total(), Duration::zero());
    }

    #[test]
    fn single_failure_gap_over_limit() {
        let mut tracker = GapTracker::new(GapThresholds::default());
        // 5 bars missing
        assert!(matches!(
            tracker.observe(t(0), t(6), Duration::minutes(1), true),
            GapVerdict::Exceeded { .. }
        ));
    }

    #[test]
    fn cumulative_failure_gaps_over_limit() {
        let mut tracker = GapTracker::new(GapThresholds::default());
        let one = Duration::minutes(1);
        assert_eq!(tracker.observe(t(0), t(3), one, true), GapVerdict::Ok); // 2m
        assert_eq!(tracker.observe(t(3), t(6), one, true), GapVerdict::Ok); // 4m
        assert_eq!(tracker.observe(t(6), t(9), one, true), GapVerdict::Ok); // 6m
        // 7m
        assert!(matches!(
            tracker.observe(t(9), t(11), one, true),
            GapVerdict::Exceeded { .. }
        ));
    }

    #[test]
    fn contiguous_bars_are_never_gaps() {
        let mut tracker = GapTracker::new(GapThresholds::default());
        assert_eq!(tracker.observe(t(0), t(1), Duration::minutes(1), true), GapVerdict::Ok);
    }
}
