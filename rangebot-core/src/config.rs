//! Engine configuration: exchange clock, instruments, sessions and the
//! global execution knobs. Loaded from TOML by the host; validated here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Instrument;
use crate::stream::exit::SameBarPriority;
use crate::stream::gap::GapThresholds;
use crate::time::{LocalTime, TimeService};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid timezone: {0}")]
    Timezone(String),

    #[error("rollover hour {0} out of range 0..=23")]
    RolloverHour(u32),

    #[error("instrument {symbol}: {reason}")]
    Instrument { symbol: String, reason: String },

    #[error("session {id}: {reason}")]
    Session { id: String, reason: String },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Sim routes orders through whatever adapter the host wires (paper or
/// replay). Live is real money and needs a second, runtime arming step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sim,
    Live,
}

/// Per-instrument trade sizing and bracket geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub tick_size: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Target distance in price points.
    pub target_points: f64,
    /// Stop distance cap as a multiple of the target distance.
    #[serde(default = "default_stop_cap_multiple")]
    pub stop_cap_multiple: f64,
}

/// Exchange session: range window start, close, and forced-flatten cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub range_start: LocalTime,
    pub market_close: LocalTime,
    pub flatten_time: LocalTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// IANA timezone of the exchange (e.g. `America/Chicago`).
    pub timezone: String,
    #[serde(default = "default_rollover_hour")]
    pub rollover_hour: u32,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub live_enabled: bool,
    #[serde(default)]
    pub same_bar_priority: SameBarPriority,
    #[serde(default = "default_bar_interval_secs")]
    pub bar_interval_secs: i64,
    #[serde(default)]
    pub gap: GapThresholds,
    #[serde(default = "default_be_fraction")]
    pub break_even_trigger_fraction: f64,
    pub instruments: BTreeMap<String, InstrumentSpec>,
    pub sessions: BTreeMap<String, SessionSpec>,
}

fn default_quantity() -> u32 {
    1
}

fn default_stop_cap_multiple() -> f64 {
    1.0
}

fn default_rollover_hour() -> u32 {
    17
}

fn default_bar_interval_secs() -> i64 {
    60
}

fn default_be_fraction() -> f64 {
    0.65
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.time_service()?;

        if self.bar_interval_secs <= 0 {
            return Err(ConfigError::Invalid {
                field: "bar_interval_secs",
                reason: format!("must be positive, got {}", self.bar_interval_secs),
            });
        }
        let fraction = self.break_even_trigger_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "break_even_trigger_fraction",
                reason: format!("must be in (0, 1], got {fraction}"),
            });
        }
        self.gap.validate().map_err(|reason| ConfigError::Invalid { field: "gap", reason })?;

        if self.instruments.is_empty() {
            return Err(ConfigError::Invalid {
                field: "instruments",
                reason: "at least one instrument".into(),
            });
        }
        for (symbol, spec) in &self.instruments {
            spec.validate(symbol)?;
        }
        for (id, session) in &self.sessions {
            session.validate(id)?;
        }
        Ok(())
    }

    pub fn time_service(&self) -> Result<TimeService, ConfigError> {
        if self.rollover_hour > 23 {
            return Err(ConfigError::RolloverHour(self.rollover_hour));
        }
        TimeService::from_name(&self.timezone, self.rollover_hour)
            .map_err(|e| ConfigError::Timezone(e.to_string()))
    }

    pub fn instrument(&self, symbol: &str) -> Option<(Instrument, &InstrumentSpec)> {
        let spec = self.instruments.get(symbol)?;
        let instrument = Instrument::new(symbol, spec.tick_size).ok()?;
        Some((instrument, spec))
    }

    pub fn bar_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.bar_interval_secs)
    }
}

impl InstrumentSpec {
    fn validate(&self, symbol: &str) -> Result<(), ConfigError> {
        let fail = |reason: String| ConfigError::Instrument { symbol: symbol.to_string(), reason };
        Instrument::new(symbol, self.tick_size).map_err(|e| fail(e.to_string()))?;
        if self.quantity == 0 {
            return Err(fail("quantity must be > 0".into()));
        }
        if !(self.target_points.is_finite() && self.target_points >= self.tick_size) {
            return Err(fail(format!(
                "target_points must be at least one tick, got {}",
                self.target_points
            )));
        }
        if !(self.stop_cap_multiple.is_finite() && self.stop_cap_multiple > 0.0) {
            return Err(fail(format!(
                "stop_cap_multiple must be > 0, got {}",
                self.stop_cap_multiple
            )));
        }
        Ok(())
    }
}

impl SessionSpec {
    fn validate(&self, id: &str) -> Result<(), ConfigError> {
        let fail = |reason: &str| ConfigError::Session {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        if self.range_start >= self.market_close {
            return Err(fail("range_start must be before market_close"));
        }
        if self.flatten_time >= self.market_close {
            return Err(fail("flatten_time must be before market_close"));
        }
        if self.flatten_time <= self.range_start {
            return Err(fail("flatten_time must be after range_start"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn es_config() -> EngineConfig {
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

    #[test]
    fn valid_config_passes() {
        assert_eq!(es_config().validate(), Ok(()));
    }

    #[test]
    fn flatten_after_close_is_rejected() {
        let mut cfg = es_config();
        cfg.sessions.get_mut("S1").unwrap().flatten_time = LocalTime::new(16, 5).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Session { .. })));
    }

    #[test]
    fn zero_tick_size_is_rejected() {
        let mut cfg = es_config();
        cfg.instruments.get_mut("ES").unwrap().tick_size = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Instrument { .. })));
    }

    #[test]
    fn break_even_fraction_bounds() {
        let mut cfg = es_config();
        cfg.break_even_trigger_fraction = 0.0;
        assert!(cfg.validate().is_err());
        cfg.break_even_trigger_fraction = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let mut cfg = es_config();
        cfg.timezone = "Nowhere/Land".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Timezone(_))));
    }
}
