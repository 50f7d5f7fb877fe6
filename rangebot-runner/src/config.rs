//! Robot configuration file.
//!
//! One TOML document with two tables:
//! - `[engine]`: everything the decision core needs (timezone, instruments,
//!   sessions, execution knobs); validated by the core
//! - `[runtime]`: host concerns (journal directory, event log, queue sizes,
//!   adapter timeout, logging)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rangebot_core::config::{ConfigError, EngineConfig};

#[derive(Debug, Error)]
pub enum RunnerConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("engine config: {0}")]
    Engine(#[from] ConfigError),

    #[error("runtime.{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotConfig {
    pub engine: EngineConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Host-side settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Directory holding one `journal-YYYY-MM-DD.jsonl` per trading day.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,

    /// JSONL file the event stream is written to. `None` keeps events in
    /// the log only.
    #[serde(default)]
    pub event_log: Option<PathBuf>,

    /// Soft capacity of the event queue. Above it, debug and info events
    /// are dropped and counted; warnings and errors are always kept.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Bound on every broker call.
    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,

    /// Capacity of the engine actor's command queue.
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Append logs to this file instead of stdout.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { format: LogFormat::default(), filter: default_log_filter(), file: None }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            journal_dir: default_journal_dir(),
            event_log: None,
            event_queue_capacity: default_event_queue_capacity(),
            adapter_timeout_ms: default_adapter_timeout_ms(),
            command_queue_capacity: default_command_queue_capacity(),
            log: LogConfig::default(),
        }
    }
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("data/journal")
}

fn default_event_queue_capacity() -> usize {
    4096
}

fn default_adapter_timeout_ms() -> u64 {
    2_000
}

fn default_command_queue_capacity() -> usize {
    1024
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl RobotConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, RunnerConfigError> {
        let config: RobotConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), RunnerConfigError> {
        self.engine.validate()?;
        let runtime = &self.runtime;
        if runtime.adapter_timeout_ms == 0 {
            return Err(RunnerConfigError::Invalid {
                field: "adapter_timeout_ms",
                reason: "must be > 0".into(),
            });
        }
        if runtime.event_queue_capacity == 0 {
            return Err(RunnerConfigError::Invalid {
                field: "event_queue_capacity",
                reason: "must be > 0".into(),
            });
        }
        if runtime.command_queue_capacity == 0 {
            return Err(RunnerConfigError::Invalid {
                field: "command_queue_capacity",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.adapter_timeout_ms)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rangebot_core::config::ExecutionMode;
    use rangebot_core::stream::exit::SameBarPriority;
    use rangebot_core::time::LocalTime;

    pub(crate) const SAMPLE: &str = r#"
[engine]
timezone = "America/Chicago"
rollover_hour = 17
same_bar_priority = "target_first"
break_even_trigger_fraction = 0.65

[engine.instruments.ES]
tick_size = 0.25
target_points = 10.0

[engine.instruments.NQ]
tick_size = 0.25
quantity = 2
target_points = 40.0
stop_cap_multiple = 0.75

[engine.sessions.S1]
range_start = "02:00"
market_close = "16:00"
flatten_time = "15:55"

[runtime]
journal_dir = "var/journal"
event_log = "var/events.jsonl"
adapter_timeout_ms = 500

[runtime.log]
format = "json"
filter = "rangebot=debug"
"#;

    #[test]
    fn parses_full_document() {
        let config = RobotConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.engine.timezone, "America/Chicago");
        assert_eq!(config.engine.execution_mode, ExecutionMode::Sim);
        assert_eq!(config.engine.same_bar_priority, SameBarPriority::TargetFirst);
        assert_eq!(config.engine.instruments["NQ"].quantity, 2);
        assert_eq!(config.engine.instruments["ES"].quantity, 1);
        assert_eq!(config.engine.sessions["S1"].flatten_time, LocalTime::new(15, 55).unwrap());
        assert_eq!(config.runtime.journal_dir, PathBuf::from("var/journal"));
        assert_eq!(config.runtime.event_log, Some(PathBuf::from("var/events.jsonl")));
        assert_eq!(config.runtime.log.format, LogFormat::Json);
        assert_eq!(config.adapter_timeout(), Duration::from_millis(500));
        assert_eq!(config.runtime.event_queue_capacity, 4096);
    }

    #[test]
    fn runtime_table_is_optional() {
        let text = SAMPLE.split("[runtime]").next().unwrap();
        let config = RobotConfig::from_toml_str(text).unwrap();
        assert_eq!(config.runtime, RuntimeConfig::default());
    }

    #[test]
    fn engine_errors_surface() {
        let text = SAMPLE.replace("flatten_time = \"15:55\"", "flatten_time = \"16:30\"");
        assert!(matches!(RobotConfig::from_toml_str(&text), Err(RunnerConfigError::Engine(_))));
    }

    #[test]
    fn bad_local_time_is_a_parse_error() {
        let text = SAMPLE.replace("\"02:00\"", "\"2am\"");
        assert!(matches!(RobotConfig::from_toml_str(&text), Err(RunnerConfigError::Parse(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let text = SAMPLE.replace("adapter_timeout_ms = 500", "adapter_timeout_ms = 0");
        assert!(matches!(
            RobotConfig::from_toml_str(&text),
            Err(RunnerConfigError::Invalid { field: "adapter_timeout_ms", .. })
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = RobotConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
