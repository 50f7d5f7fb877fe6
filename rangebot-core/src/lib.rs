//! Rangebot Core: the decision-and-execution core of an opening-range
//! breakout robot for futures.
//!
//! - Exchange clock and trading-day lock (DST-correct)
//! - Per-stream state machine: range → breakout → bracket → exit
//! - Idempotent execution journal keyed by content-hashed intents
//! - Fail-closed risk gate chain with a global kill switch
//! - Engine: stream registry, bar/tick fan-out, connection recovery
//! - Structured event stream for telemetry
//!
//! The crate performs no I/O of its own. Brokers, bar sources, durable
//! journal storage and event sinks are traits supplied by the host.

pub mod adapter;
pub mod config;
pub mod domain;
pub mod engine;
pub mod events;
pub mod journal;
pub mod risk;
pub mod stream;
pub mod testkit;
pub mod time;
pub mod timetable;

pub use adapter::{BarProvider, ConnectionStatus, ExecutionAdapter};
pub use config::{EngineConfig, ExecutionMode};
pub use engine::{EngineDeps, EngineError, EngineSummary, RobotEngine, SharedEngine};
pub use events::{EventKind, EventSink, RobotEvent, Severity};
pub use journal::{ExecutionJournal, JournalStore};
pub use risk::KillSwitch;
pub use stream::{StreamState, TerminalReason};
pub use time::TimeService;
pub use timetable::Timetable;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the host shares across threads is
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Intent>();
        require_sync::<domain::Intent>();
        require_send::<domain::ExecutionUpdate>();
        require_sync::<domain::ExecutionUpdate>();
        require_send::<RobotEvent>();
        require_sync::<RobotEvent>();

        require_send::<ExecutionJournal>();
        require_sync::<ExecutionJournal>();
        require_send::<KillSwitch>();
        require_sync::<KillSwitch>();
        require_send::<risk::RiskGate>();
        require_sync::<risk::RiskGate>();

        require_send::<stream::StreamStateMachine>();
        require_send::<RobotEngine>();
        require_send::<SharedEngine>();
        require_sync::<SharedEngine>();
    }
}
