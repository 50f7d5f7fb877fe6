//! Mutex-serialized handle for hosts that call the engine from several
//! threads (platform callbacks, timers, broker events).
//!
//! Every call takes the one engine lock for its whole duration, so bar,
//! tick and execution-update handling never interleave.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::adapter::ConnectionStatus;
use crate::domain::{Bar, ExecutionUpdate};
use crate::engine::{EngineError, EngineSummary, FeedStatus, RobotEngine};

#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<RobotEngine>>,
}

impl SharedEngine {
    pub fn new(engine: RobotEngine) -> Self {
        Self { inner: Arc::new(Mutex::new(engine)) }
    }

    pub fn on_bar(&self, instrument: &str, bar: &Bar) -> Result<(), EngineError> {
        self.inner.lock().on_bar(instrument, bar)
    }

    pub fn on_tick(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.inner.lock().on_tick(now)
    }

    pub fn on_execution_update(
        &self,
        update: &ExecutionUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.inner.lock().on_execution_update(update, now)
    }

    pub fn on_connection_status(
        &self,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.inner.lock().on_connection_status(status, now)
    }

    pub fn on_feed_status(
        &self,
        instrument: &str,
        status: FeedStatus,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.inner.lock().on_feed_status(instrument, status, now)
    }

    pub fn summary(&self) -> Result<EngineSummary, EngineError> {
        self.inner.lock().summary()
    }

    /// Run an arbitrary closure under the engine lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut RobotEngine) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl std::fmt::Debug for SharedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEngine").finish_non_exhaustive()
    }
}
