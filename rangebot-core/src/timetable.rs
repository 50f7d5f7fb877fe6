//! Timetable: the day's versioned list of stream directives.
//!
//! Document-level problems (schema version, timezone, trading day) reject
//! the whole document. Directive-level problems reject only that directive.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::domain::{StreamId, TradingDay};
use crate::time::LocalTime;

/// Highest schema version this build understands.
pub const TIMETABLE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimetableError {
    #[error("unsupported timetable schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("timetable timezone '{found}' does not match configured '{expected}'")]
    TimezoneMismatch { found: String, expected: String },

    #[error("timetable is for {found}, locked trading day is {expected}")]
    TradingDayMismatch { found: TradingDay, expected: TradingDay },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDirective {
    pub stream_id: StreamId,
    pub instrument: String,
    pub session_id: String,
    pub decision_time: LocalTime,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timetable {
    pub schema_version: u32,
    pub trading_day: TradingDay,
    pub timezone: String,
    #[serde(default)]
    pub streams: Vec<StreamDirective>,
}

/// Validity facts about the accepted timetable, re-checked by the risk gate
/// at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimetableStatus {
    pub trading_day: TradingDay,
    pub timezone: String,
    pub schema_version: u32,
    pub revision: u64,
}

impl TimetableStatus {
    pub fn schema_valid(&self) -> bool {
        self.schema_version >= 1 && self.schema_version <= TIMETABLE_SCHEMA_VERSION
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveRejection {
    pub stream_id: StreamId,
    pub reason: String,
}

/// Output of validation: directives safe to act on plus per-directive rejections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedTimetable {
    pub accepted: Vec<StreamDirective>,
    pub rejected: Vec<DirectiveRejection>,
}

impl Timetable {
    pub fn validate(
        &self,
        locked_day: TradingDay,
        config: &EngineConfig,
    ) -> Result<ValidatedTimetable, TimetableError> {
        if self.schema_version == 0 || self.schema_version > TIMETABLE_SCHEMA_VERSION {
            return Err(TimetableError::UnsupportedSchema {
                found: self.schema_version,
                supported: TIMETABLE_SCHEMA_VERSION,
            });
        }
        if self.timezone != config.timezone {
            return Err(TimetableError::TimezoneMismatch {
                found: self.timezone.clone(),
                expected: config.timezone.clone(),
            });
        }
        if self.trading_day != locked_day {
            return Err(TimetableError::TradingDayMismatch {
                found: self.trading_day,
                expected: locked_day,
            });
        }

        let mut out = ValidatedTimetable::default();
        let mut seen = BTreeSet::new();
        for directive in &self.streams {
            let verdict = if !seen.insert(directive.stream_id.clone()) {
                Err("duplicate stream_id in timetable".to_string())
            } else {
                directive.check(config)
            };
            match verdict {
                Ok(()) => out.accepted.push(directive.clone()),
                Err(reason) => {
                    let stream_id = directive.stream_id.clone();
                    out.rejected.push(DirectiveRejection { stream_id, reason });
                }
            }
        }
        Ok(out)
    }
}

impl StreamDirective {
    fn check(&self, config: &EngineConfig) -> Result<(), String> {
        if self.stream_id.as_str().trim().is_empty() {
            return Err("empty stream_id".into());
        }
        if !config.instruments.contains_key(&self.instrument) {
            return Err(format!("unknown instrument '{}'", self.instrument));
        }
        let session = config
            .sessions
            .get(&self.session_id)
            .ok_or_else(|| format!("unknown session '{}'", self.session_id))?;
        if self.decision_time <= session.range_start {
            return Err(format!(
                "decision_time {} must be after range_start {}",
                self.decision_time, session.range_start
            ));
        }
        if self.decision_time >= session.flatten_time {
            return Err(format!(
                "decision_time {} must be before flatten_time {}",
                self.decision_time, session.flatten_time
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::es_config;

    fn day() -> TradingDay {
        TradingDay::from_ymd(2025, 12, 1).unwrap()
    }

    fn directive(id: &str, decision: &str) -> StreamDirective {
        StreamDirective {
            stream_id: StreamId::new(id),
            instrument: "ES".into(),
            session_id: "S1".into(),
            decision_time: LocalTime::parse(decision).unwrap(),
            enabled: true,
            block_reason: None,
        }
    }

    fn timetable(streams: Vec<StreamDirective>) -> Timetable {
        Timetable {
            schema_version: 1,
            trading_day: day(),
            timezone: "America/Chicago".into(),
            streams,
        }
    }

    #[test]
    fn timezone_mismatch_is_a_hard_reject() {
        let mut tt = timetable(vec![directive("ES1", "07:30")]);
        tt.timezone = "America/New_York".into();
        assert!(matches!(
            tt.validate(day(), &es_config()),
            Err(TimetableError::TimezoneMismatch { .. })
        ));
    }

    #[test]
    fn wrong_trading_day_is_rejected() {
        let tt = timetable(vec![]);
        let other = TradingDay::from_ymd(2025, 12, 2).unwrap();
        assert!(matches!(
            tt.validate(other, &es_config()),
            Err(TimetableError::TradingDayMismatch { .. })
        ));
    }

    #[test]
    fn future_schema_is_rejected() {
        let mut tt = timetable(vec![]);
        tt.schema_version = TIMETABLE_SCHEMA_VERSION + 1;
        assert!(matches!(
            tt.validate(day(), &es_config()),
            Err(TimetableError::UnsupportedSchema { .. })
        ));
    }

    #[test]
    fn bad_directives_are_rejected_individually() {
        let mut unknown = directive("NQ1", "07:30");
        unknown.instrument = "NQ".into();
        let tt = timetable(vec![
            directive("ES1", "07:30"),
            unknown,
            directive("ES1", "08:00"),
            directive("ES2", "01:00"),
        ]);
        let validated = tt.validate(day(), &es_config()).unwrap();
        assert_eq!(validated.accepted.len(), 1);
        assert_eq!(validated.rejected.len(), 3);
        assert_eq!(validated.accepted[0].stream_id, StreamId::new("ES1"));
    }

    #[test]
    fn directive_parses_from_json() {
        let json = r#"{
            "schema_version": 1,
            "trading_day": "2025-12-01",
            "timezone": "America/Chicago",
            "streams": [
                {
                    "stream_id": "ES1",
                    "instrument": "ES",
                    "session_id": "S1",
                    "decision_time": "07:30"
                }
            ]
        }"#;
        let tt: Timetable = serde_json::from_str(json).unwrap();
        assert!(tt.streams[0].enabled);
        assert_eq!(tt.streams[0].decision_time, LocalTime::new(7, 30).unwrap());
    }
}
