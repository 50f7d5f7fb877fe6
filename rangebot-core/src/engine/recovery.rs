//! Connection recovery: blocks submissions until the broker is confirmed
//! healthy again.
//!
//! A new machine owes a sync: nothing is submitted until the first broker
//! snapshot reconciles clean.
//!
//! ```text
//!   (start) ──▶ AwaitingSync
//!   Healthy ──(Lost | Disconnected | Error)──▶ Disconnected
//!   Disconnected ──Connected──▶ AwaitingSync ──sync ok──▶ Healthy
//!                                     └──orphans / sync error──▶ SyncFailed
//!   SyncFailed ──(Connected | retry)──▶ AwaitingSync
//! ```

use serde::{Deserialize, Serialize};

use crate::adapter::{BrokerOrder, BrokerSnapshot, ConnectionStatus};
use crate::domain::IntentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryState {
    Healthy,
    Disconnected,
    AwaitingSync,
    SyncFailed,
}

impl RecoveryState {
    pub fn allows_submissions(self) -> bool {
        self == RecoveryState::Healthy
    }
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecoveryState::Healthy => "HEALTHY",
            RecoveryState::Disconnected => "DISCONNECTED",
            RecoveryState::AwaitingSync => "AWAITING_SYNC",
            RecoveryState::SyncFailed => "SYNC_FAILED",
        };
        f.write_str(s)
    }
}

/// A state change, reported so the engine can emit it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryTransition {
    pub from: RecoveryState,
    pub to: RecoveryState,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecoveryMachine {
    state: RecoveryState,
}

impl Default for RecoveryMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryMachine {
    pub fn new() -> Self {
        Self { state: RecoveryState::AwaitingSync }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// A sync is owed: call `sync_state` and feed the result to [`Self::on_sync`].
    pub fn needs_sync(&self) -> bool {
        matches!(self.state, RecoveryState::AwaitingSync | RecoveryState::SyncFailed)
    }

    pub fn on_status(&mut self, status: ConnectionStatus) -> Option<RecoveryTransition> {
        let next = match (status, self.state) {
            (ConnectionStatus::Connected, RecoveryState::Healthy) => return None,
            (ConnectionStatus::Connected, RecoveryState::AwaitingSync) => return None,
            (ConnectionStatus::Connected, _) => RecoveryState::AwaitingSync,
            (_, RecoveryState::Disconnected) => return None,
            _ => RecoveryState::Disconnected,
        };
        Some(self.move_to(next, Some(format!("connection {status:?}"))))
    }

    /// Apply the result of a broker state sync.
    pub fn on_sync(&mut self, outcome: SyncOutcome) -> Option<RecoveryTransition> {
        if !self.needs_sync() {
            return None;
        }
        let (next, detail) = match outcome {
            SyncOutcome::Clean { open_orders } => (
                RecoveryState::Healthy,
                Some(format!("sync clean, {open_orders} open orders reconciled")),
            ),
            SyncOutcome::Orphans(orphans) => {
                let ids: Vec<&str> =
                    orphans.iter().map(|o| o.broker_order_id.0.as_str()).collect();
                (
                    RecoveryState::SyncFailed,
                    Some(format!("orphaned broker orders: {}", ids.join(", "))),
                )
            }
            SyncOutcome::Failed(reason) => {
                (RecoveryState::SyncFailed, Some(format!("sync failed: {reason}")))
            }
        };
        if next == self.state {
            return None;
        }
        Some(self.move_to(next, detail))
    }

    fn move_to(&mut self, next: RecoveryState, detail: Option<String>) -> RecoveryTransition {
        let from = self.state;
        self.state = next;
        RecoveryTransition { from, to: next, detail }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Clean { open_orders: usize },
    Orphans(Vec<BrokerOrder>),
    Failed(String),
}

/// Classify a broker snapshot: every open order must carry an intent id the
/// journal knows about.
pub fn reconcile(snapshot: &BrokerSnapshot, known: impl Fn(&IntentId) -> bool) -> SyncOutcome {
    let orphans: Vec<BrokerOrder> = snapshot
        .open_orders
        .iter()
        .filter(|o| !o.intent_id.as_ref().is_some_and(&known))
        .cloned()
        .collect();
    if orphans.is_empty() {
        SyncOutcome::Clean { open_orders: snapshot.open_orders.len() }
    } else {
        SyncOutcome::Orphans(orphans)
    }
}
