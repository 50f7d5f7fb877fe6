//! Queued event sink: fire-and-forget `emit`, JSONL drain task.
//!
//! The engine calls `emit` on its own thread and never waits on I/O. Events
//! go onto an unbounded channel whose depth is tracked against a soft
//! capacity: above it, `Debug` and `Info` events are dropped and counted.
//! `Warn` and `Error` events are always queued.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use rangebot_core::events::{EventSink, RobotEvent, Severity};

#[derive(Debug, Default)]
struct QueueStats {
    depth: AtomicUsize,
    dropped: AtomicU64,
}

#[derive(Clone)]
pub struct QueuedEventSink {
    tx: mpsc::UnboundedSender<RobotEvent>,
    stats: Arc<QueueStats>,
    capacity: usize,
}

/// Receiving end of the queue. Decrements the depth on every event taken.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<RobotEvent>,
    stats: Arc<QueueStats>,
}

/// Handle to the drain task spawned by [`QueuedEventSink::spawn`].
pub struct EventDrain {
    task: JoinHandle<Result<u64>>,
}

impl QueuedEventSink {
    /// Sink plus its receiver, without a drain task.
    pub fn channel(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats::default());
        let sink = Self { tx, stats: Arc::clone(&stats), capacity: capacity.max(1) };
        (sink, EventReceiver { rx, stats })
    }

    /// Start a drain task writing one JSON object per line to `path`
    /// (appending). With no path the drain only consumes the queue. Must be
    /// called inside a tokio runtime.
    pub async fn spawn(path: Option<&Path>, capacity: usize) -> Result<(Self, EventDrain)> {
        let (sink, receiver) = Self::channel(capacity);
        let writer = match path {
            Some(path) => Some(open_append(path).await?),
            None => None,
        };
        let task = tokio::spawn(drain(receiver, writer));
        Ok((sink, EventDrain { task }))
    }

    /// Events dropped because the queue was over its soft capacity.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    pub fn depth(&self) -> usize {
        self.stats.depth.load(Ordering::Relaxed)
    }
}

impl EventSink for QueuedEventSink {
    fn emit(&self, event: RobotEvent) {
        let depth = self.stats.depth.load(Ordering::Relaxed);
        if depth >= self.capacity && event.severity <= Severity::Info {
            let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                warn!(dropped, depth, "event queue over capacity; dropping low-severity events");
            }
            return;
        }
        self.stats.depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.stats.depth.fetch_sub(1, Ordering::Relaxed);
            debug!("event drain closed; event discarded");
        }
    }
}

impl std::fmt::Debug for QueuedEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedEventSink")
            .field("capacity", &self.capacity)
            .field("depth", &self.depth())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<RobotEvent> {
        let event = self.rx.recv().await?;
        self.stats.depth.fetch_sub(1, Ordering::Relaxed);
        Some(event)
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<RobotEvent> {
        let event = self.rx.try_recv().ok()?;
        self.stats.depth.fetch_sub(1, Ordering::Relaxed);
        Some(event)
    }
}

impl EventDrain {
    /// Wait for the drain to finish. It finishes once every sink clone has
    /// been dropped and the queue is empty. Returns the number of events
    /// written.
    pub async fn finish(self) -> Result<u64> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("event drain task aborted: {err}")),
        }
    }
}

async fn open_append(path: &Path) -> Result<BufWriter<fs::File>> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open event log {}", path.display()))?;
    Ok(BufWriter::new(file))
}

async fn drain(
    mut receiver: EventReceiver,
    mut writer: Option<BufWriter<fs::File>>,
) -> Result<u64> {
    let mut written = 0u64;
    while let Some(event) = receiver.recv().await {
        if let Some(out) = writer.as_mut() {
            let mut line = serde_json::to_vec(&event).context("failed to encode event")?;
            line.push(b'\n');
            out.write_all(&line).await.context("failed to write event log")?;
            out.flush().await.context("failed to flush event log")?;
        }
        written += 1;
    }
    Ok(written)
}

/// Read an event log back, skipping malformed lines.
pub fn read_event_log(path: &Path) -> Result<Vec<RobotEvent>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rangebot_core::domain::TradingDay;
    use rangebot_core::events::EventKind;
    use tempfile::TempDir;

    fn event(severity: Severity, kind: EventKind) -> RobotEvent {
        RobotEvent::new(
            TradingDay::from_ymd(2025, 12, 1).unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 1, 13, 30, 0).unwrap(),
            severity,
            kind,
        )
    }

    fn info() -> RobotEvent {
        event(Severity::Info, EventKind::LiveArmed)
    }

    fn warning() -> RobotEvent {
        event(Severity::Warn, EventKind::KillSwitchChanged { enabled: true })
    }

    #[tokio::test]
    async fn low_severity_is_dropped_over_capacity() {
        let (sink, mut rx) = QueuedEventSink::channel(2);
        sink.emit(info());
        sink.emit(info());
        sink.emit(info());
        sink.emit(event(Severity::Debug, EventKind::LiveArmed));
        assert_eq!(sink.dropped(), 2);
        assert_eq!(sink.depth(), 2);

        sink.emit(warning());
        sink.emit(event(Severity::Error, EventKind::IdempotencyViolation { detail: "x".into() }));
        assert_eq!(sink.dropped(), 2);
        assert_eq!(sink.depth(), 4);

        let mut received = Vec::new();
        while let Some(ev) = rx.try_recv() {
            received.push(ev.severity);
        }
        assert_eq!(received, vec![Severity::Info, Severity::Info, Severity::Warn, Severity::Error]);
        assert_eq!(sink.depth(), 0);

        // Room again after draining.
        sink.emit(info());
        assert_eq!(sink.dropped(), 2);
    }

    #[tokio::test]
    async fn drain_writes_jsonl_and_finishes_when_sinks_drop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs/events.jsonl");
        let (sink, drain) = QueuedEventSink::spawn(Some(&path), 64).await.unwrap();
        sink.emit(info());
        sink.emit(warning());
        drop(sink);

        assert_eq!(drain.finish().await.unwrap(), 2);
        let events = read_event_log(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind.name(), "KILL_SWITCH_CHANGED");
    }

    #[tokio::test]
    async fn emit_after_drain_closed_does_not_panic() {
        let (sink, rx) = QueuedEventSink::channel(4);
        drop(rx);
        sink.emit(warning());
        assert_eq!(sink.depth(), 0);
    }
}
