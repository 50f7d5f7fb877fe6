//! TimeService: exchange-local civil time ↔ UTC, DST-correct.
//!
//! All conversions go through `chrono_tz`. Local times that fall into a
//! spring-forward gap or a fall-back overlap are rejected with a typed error
//! rather than resolved to either side.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, LocalResult, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TradingDay;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeError {
    #[error("invalid local time '{0}': expected HH:MM")]
    InvalidFormat(String),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("rollover hour {0} out of range 0..=23")]
    InvalidRolloverHour(u32),

    #[error("{time} on {day} does not exist in {tz} (DST gap)")]
    NonexistentLocalTime { day: TradingDay, time: LocalTime, tz: String },

    #[error("{time} on {day} is ambiguous in {tz} (DST overlap)")]
    AmbiguousLocalTime { day: TradingDay, time: LocalTime, tz: String },
}

/// Exchange-local wall-clock time of day, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalTime(NaiveTime);

impl LocalTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn parse(text: &str) -> Result<Self, TimeError> {
        let trimmed = text.trim();
        // "%H:%M" alone would also accept "7:30"; require the two-digit form.
        if trimmed.len() != 5 {
            return Err(TimeError::InvalidFormat(text.to_string()));
        }
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .map(Self)
            .map_err(|_| TimeError::InvalidFormat(text.to_string()))
    }

    pub fn naive(&self) -> NaiveTime {
        self.0
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for LocalTime {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LocalTime {
    type Error = TimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LocalTime> for String {
    fn from(value: LocalTime) -> Self {
        value.to_string()
    }
}

/// Timezone-aware clock arithmetic for one exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeService {
    tz: Tz,
    rollover_hour: u32,
}

impl TimeService {
    pub fn new(tz: Tz, rollover_hour: u32) -> Result<Self, TimeError> {
        if rollover_hour > 23 {
            return Err(TimeError::InvalidRolloverHour(rollover_hour));
        }
        Ok(Self { tz, rollover_hour })
    }

    /// Build from an IANA name such as `America/Chicago`.
    pub fn from_name(name: &str, rollover_hour: u32) -> Result<Self, TimeError> {
        let tz: Tz = name.parse().map_err(|_| TimeError::UnknownTimezone(name.to_string()))?;
        Self::new(tz, rollover_hour)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn timezone_name(&self) -> &'static str {
        self.tz.name()
    }

    pub fn rollover_hour(&self) -> u32 {
        self.rollover_hour
    }

    /// `trading_day` + local `HH:MM` → UTC instant.
    pub fn local_to_utc(
        &self,
        trading_day: TradingDay,
        hhmm: &str,
    ) -> Result<DateTime<Utc>, TimeError> {
        let time = LocalTime::parse(hhmm)?;
        self.local_time_to_utc(trading_day, time)
    }

    pub fn local_time_to_utc(
        &self,
        trading_day: TradingDay,
        time: LocalTime,
    ) -> Result<DateTime<Utc>, TimeError> {
        let naive = trading_day.date().and_time(time.naive());
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
            LocalResult::Ambiguous(_, _) => Err(TimeError::AmbiguousLocalTime {
                day: trading_day,
                time,
                tz: self.tz.name().to_string(),
            }),
            LocalResult::None => Err(TimeError::NonexistentLocalTime {
                day: trading_day,
                time,
                tz: self.tz.name().to_string(),
            }),
        }
    }

    pub fn utc_to_local(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.tz)
    }

    /// Trading day an instant belongs to: the local calendar date, or the
    /// next date once the local hour has reached the rollover hour.
    pub fn trading_day_of(&self, instant: DateTime<Utc>) -> TradingDay {
        let local = self.utc_to_local(instant);
        let date = local.date_naive();
        if self.rollover_hour > 0 && local.hour() >= self.rollover_hour {
            TradingDay(date.succ_opt().unwrap_or(date))
        } else {
            TradingDay(date)
        }
    }
}
