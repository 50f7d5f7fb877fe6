//! Engine actor: the serialized single-writer executor.
//!
//! The engine lives on one dedicated OS thread and drains a bounded
//! `tokio::sync::mpsc` queue. Producers (bar feed, broker callbacks, clock,
//! operator controls) hold cloned [`EngineHandle`]s and never touch the
//! engine directly, so bar, tick and execution-update handling can never
//! interleave.
//!
//! Fire-and-forget commands (bars, ticks, updates, status) log engine
//! errors and move on. Control commands (start, timetable, summary,
//! arming, close) answer on a oneshot channel.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use rangebot_core::adapter::ConnectionStatus;
use rangebot_core::domain::{Bar, ExecutionUpdate, TradingDay};
use rangebot_core::engine::{EngineError, EngineSummary, FeedStatus, RobotEngine, TimetableOutcome};
use rangebot_core::timetable::Timetable;

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("engine actor has stopped")]
    Stopped,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

#[derive(Debug)]
pub enum EngineCommand {
    Start { now: DateTime<Utc>, reply: Reply<TradingDay> },
    LoadTimetable { timetable: Box<Timetable>, now: DateTime<Utc>, reply: Reply<TimetableOutcome> },
    Bar { instrument: String, bar: Bar },
    Tick { now: DateTime<Utc> },
    Execution { update: ExecutionUpdate, now: DateTime<Utc> },
    Connection { status: ConnectionStatus, now: DateTime<Utc> },
    Feed { instrument: String, status: FeedStatus, now: DateTime<Utc> },
    KillSwitch { enabled: bool, now: DateTime<Utc> },
    ArmLive { phrase: String, now: DateTime<Utc>, reply: Reply<()> },
    Summary { reply: Reply<EngineSummary> },
    CloseDay { now: DateTime<Utc>, reply: Reply<EngineSummary> },
    Shutdown,
}

impl EngineCommand {
    fn name(&self) -> &'static str {
        match self {
            EngineCommand::Start { .. } => "start",
            EngineCommand::LoadTimetable { .. } => "load_timetable",
            EngineCommand::Bar { .. } => "bar",
            EngineCommand::Tick { .. } => "tick",
            EngineCommand::Execution { .. } => "execution",
            EngineCommand::Connection { .. } => "connection",
            EngineCommand::Feed { .. } => "feed",
            EngineCommand::KillSwitch { .. } => "kill_switch",
            EngineCommand::ArmLive { .. } => "arm_live",
            EngineCommand::Summary { .. } => "summary",
            EngineCommand::CloseDay { .. } => "close_day",
            EngineCommand::Shutdown => "shutdown",
        }
    }
}

/// Owns the engine thread. Dropping every handle or sending
/// [`EngineCommand::Shutdown`] stops it.
pub struct EngineActor {
    thread: JoinHandle<RobotEngine>,
}

impl EngineActor {
    /// Move the engine onto its own thread.
    pub fn spawn(engine: RobotEngine, capacity: usize) -> std::io::Result<(Self, EngineHandle)> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let thread = thread::Builder::new()
            .name("rangebot-engine".into())
            .spawn(move || run(engine, rx))?;
        Ok((Self { thread }, EngineHandle { tx }))
    }

    /// Wait for the thread to stop and take the engine back.
    pub fn join(self) -> Result<RobotEngine, ActorError> {
        self.thread.join().map_err(|_| ActorError::Stopped)
    }
}

fn run(mut engine: RobotEngine, mut rx: mpsc::Receiver<EngineCommand>) -> RobotEngine {
    info!("engine actor started");
    let mut handled = 0u64;
    while let Some(command) = rx.blocking_recv() {
        let name = command.name();
        if matches!(command, EngineCommand::Shutdown) {
            break;
        }
        handle(&mut engine, command);
        handled += 1;
        debug!(command = name, "command handled");
    }
    info!(handled, "engine actor stopped");
    engine
}

fn handle(engine: &mut RobotEngine, command: EngineCommand) {
    let outcome = match command {
        EngineCommand::Start { now, reply } => {
            let _ = reply.send(engine.start(now));
            Ok(())
        }
        EngineCommand::LoadTimetable { timetable, now, reply } => {
            let _ = reply.send(engine.load_timetable(&timetable, now));
            Ok(())
        }
        EngineCommand::Bar { instrument, bar } => engine.on_bar(&instrument, &bar),
        EngineCommand::Tick { now } => engine.on_tick(now),
        EngineCommand::Execution { update, now } => engine.on_execution_update(&update, now),
        EngineCommand::Connection { status, now } => engine.on_connection_status(status, now),
        EngineCommand::Feed { instrument, status, now } => {
            engine.on_feed_status(&instrument, status, now)
        }
        EngineCommand::KillSwitch { enabled, now } => {
            engine.set_kill_switch(enabled, now);
            Ok(())
        }
        EngineCommand::ArmLive { phrase, now, reply } => {
            let _ = reply.send(engine.arm_live(&phrase, now));
            Ok(())
        }
        EngineCommand::Summary { reply } => {
            let _ = reply.send(engine.summary());
            Ok(())
        }
        EngineCommand::CloseDay { now, reply } => {
            let _ = reply.send(engine.close_day(now));
            Ok(())
        }
        EngineCommand::Shutdown => Ok(()),
    };
    if let Err(err) = outcome {
        warn!(%err, "engine command failed");
    }
}

/// Cloneable producer side of the actor queue.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> Result<(), ActorError> {
        self.tx.send(command).await.map_err(|_| ActorError::Stopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineCommand,
    ) -> Result<T, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        Ok(rx.await.map_err(|_| ActorError::Stopped)??)
    }

    pub async fn start(&self, now: DateTime<Utc>) -> Result<TradingDay, ActorError> {
        self.request(|reply| EngineCommand::Start { now, reply }).await
    }

    pub async fn load_timetable(
        &self,
        timetable: Timetable,
        now: DateTime<Utc>,
    ) -> Result<TimetableOutcome, ActorError> {
        self.request(|reply| EngineCommand::LoadTimetable {
            timetable: Box::new(timetable),
            now,
            reply,
        })
        .await
    }

    pub async fn bar(&self, instrument: impl Into<String>, bar: Bar) -> Result<(), ActorError> {
        self.send(EngineCommand::Bar { instrument: instrument.into(), bar }).await
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(), ActorError> {
        self.send(EngineCommand::Tick { now }).await
    }

    pub async fn execution_update(
        &self,
        update: ExecutionUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), ActorError> {
        self.send(EngineCommand::Execution { update, now }).await
    }

    pub async fn connection_status(
        &self,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ActorError> {
        self.send(EngineCommand::Connection { status, now }).await
    }

    pub async fn feed_status(
        &self,
        instrument: impl Into<String>,
        status: FeedStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ActorError> {
        self.send(EngineCommand::Feed { instrument: instrument.into(), status, now }).await
    }

    pub async fn kill_switch(&self, enabled: bool, now: DateTime<Utc>) -> Result<(), ActorError> {
        self.send(EngineCommand::KillSwitch { enabled, now }).await
    }

    pub async fn arm_live(
        &self,
        phrase: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ActorError> {
        let phrase = phrase.into();
        self.request(|reply| EngineCommand::ArmLive { phrase, now, reply }).await
    }

    pub async fn summary(&self) -> Result<EngineSummary, ActorError> {
        self.request(|reply| EngineCommand::Summary { reply }).await
    }

    pub async fn close_day(&self, now: DateTime<Utc>) -> Result<EngineSummary, ActorError> {
        self.request(|reply| EngineCommand::CloseDay { now, reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), ActorError> {
        self.send(EngineCommand::Shutdown).await
    }
}

/// Send a wall-clock tick every `period` until the actor stops.
pub fn spawn_ticker(handle: EngineHandle, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if handle.tick(Utc::now()).await.is_err() {
                debug!("ticker stopping: engine actor gone");
                break;
            }
        }
    })
}
