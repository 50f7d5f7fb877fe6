//! Rangebot Runner: host runtime around the decision core.
//!
//! - TOML config loading and tracing subscriber setup
//! - Durable JSONL journal store (one file per trading day)
//! - Queued event sink with a JSONL drain task
//! - Engine actor: one thread, one command queue, no interleaving
//! - Broker bridge with per-call timeouts; paper adapter for dry runs
//! - CSV bar source and deterministic day replay

pub mod actor;
pub mod bridge;
pub mod config;
pub mod csv_source;
pub mod event_sink;
pub mod journal_store;
pub mod logging;
pub mod paper;
pub mod replay;

pub use actor::{spawn_ticker, ActorError, EngineActor, EngineCommand, EngineHandle};
pub use bridge::{BrokerBridge, BrokerClient};
pub use config::{LogConfig, LogFormat, RobotConfig, RunnerConfigError, RuntimeConfig};
pub use csv_source::CsvBarSource;
pub use event_sink::{EventDrain, EventReceiver, QueuedEventSink};
pub use journal_store::JsonlJournalStore;
pub use logging::init_subscriber;
pub use paper::PaperAdapter;
pub use replay::{replay_day, ReplayOptions, ReplayReport};
