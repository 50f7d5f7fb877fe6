//! Bar: one fixed-interval OHLC observation for a single instrument.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLC bar. `timestamp` is the bar's OPEN time in UTC; a bar covers
/// `[timestamp, timestamp + bar_interval)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self { timestamp, open, high, low, close, volume: None }
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Returns true if any OHLC field is not finite.
    pub fn is_void(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }

    /// Basic OHLC sanity check: high >= low, high bounds open/close, low bounds open/close.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.low > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2025, 12, 1, 14, 30, 0).unwrap(),
            5000.0,
            5002.5,
            4999.0,
            5001.25,
        )
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar().is_sane());
    }

    #[test]
    fn inverted_bar_is_not_sane() {
        let mut bar = sample_bar();
        bar.high = 4990.0;
        assert!(!bar.is_sane());
    }

    #[test]
    fn nan_bar_is_void() {
        let mut bar = sample_bar();
        bar.close = f64::NAN;
        assert!(bar.is_void());
        assert!(!bar.is_sane());
    }

    #[test]
    fn volume_is_optional_on_the_wire() {
        let json =
            r#"{"timestamp":"2025-12-01T14:30:00Z","open":1.0,"high":2.0,"low":0.5,"close":1.5}"#;
        let bar: Bar = serde_json::from_str(json).unwrap();
        assert_eq!(bar.volume, None);
        assert!(bar.is_sane());
    }
}
