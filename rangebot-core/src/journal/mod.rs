//! ExecutionJournal: the durable idempotency ledger.
//!
//! Keyed by `(trading_day, stream_id, intent_id)`. The in-memory index is
//! populated once from the store at open and every change is written to the
//! store before it becomes visible in the index. Check-and-insert for a
//! submission happens under one lock, so two racing submitters of the same
//! intent see exactly one `Claimed` and one `AlreadySubmitted`.

pub mod record;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::domain::{BrokerOrderId, Intent, IntentId, StreamId, TradingDay};

pub use record::{JournalKey, JournalRecord, JournalState, RangeLockRecord, TerminalOutcome};
pub use store::{JournalSnapshot, JournalStore, MemoryJournalStore};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum JournalError {
    #[error("journal storage error: {0}")]
    Storage(String),

    #[error("idempotency violation for intent {intent_id}: {detail}")]
    IdempotencyViolation { intent_id: IntentId, detail: String },

    #[error("intent is for trading day {found}, journal is open for {expected}")]
    WrongTradingDay { found: TradingDay, expected: TradingDay },

    #[error("unknown intent {0}")]
    UnknownIntent(IntentId),

    #[error("intent {intent_id} is {state}; transition to {next} refused")]
    IllegalTransition { intent_id: IntentId, state: JournalState, next: JournalState },

    #[error("broker order id {broker_order_id} already belongs to intent {existing}")]
    DuplicateBrokerOrderId { broker_order_id: BrokerOrderId, existing: IntentId },

    #[error("intent {intent_id} already acknowledged as {existing}, refusing {new}")]
    BrokerOrderIdChanged { intent_id: IntentId, existing: BrokerOrderId, new: BrokerOrderId },
}

impl JournalError {
    /// Fatal logic errors that must never be treated as ordinary rejections.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JournalError::IdempotencyViolation { .. })
    }
}

/// Result of an atomic check-and-record for a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionClaim {
    /// This caller owns the submission and must now call the adapter.
    Claimed(JournalRecord),
    /// Already journaled by an earlier attempt; do not submit.
    AlreadySubmitted(JournalRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeLockClaim {
    Fresh(RangeLockRecord),
    Existing(RangeLockRecord),
}

impl RangeLockClaim {
    pub fn record(&self) -> &RangeLockRecord {
        match self {
            RangeLockClaim::Fresh(r) | RangeLockClaim::Existing(r) => r,
        }
    }
}

#[derive(Debug, Default)]
struct JournalIndex {
    records: HashMap<JournalKey, JournalRecord>,
    by_intent: HashMap<IntentId, JournalKey>,
    broker_ids: HashMap<BrokerOrderId, IntentId>,
    range_locks: HashMap<StreamId, RangeLockRecord>,
}

impl JournalIndex {
    fn upsert(&mut self, record: JournalRecord) {
        if let Some(broker_id) = &record.broker_order_id {
            self.broker_ids.insert(broker_id.clone(), record.key.intent_id.clone());
        }
        self.by_intent.insert(record.key.intent_id.clone(), record.key.clone());
        self.records.insert(record.key.clone(), record);
    }

    fn get(&self, intent_id: &IntentId) -> Option<&JournalRecord> {
        self.by_intent.get(intent_id).and_then(|key| self.records.get(key))
    }
}

pub struct ExecutionJournal {
    trading_day: TradingDay,
    store: Arc<dyn JournalStore>,
    index: Mutex<JournalIndex>,
}

impl ExecutionJournal {
    /// Open the journal for a day, rebuilding the index from the store.
    pub fn open(
        store: Arc<dyn JournalStore>,
        trading_day: TradingDay,
    ) -> Result<Self, JournalError> {
        let snapshot = store.load(trading_day)?;
        let mut index = JournalIndex::default();
        let lines = snapshot.records.len();
        for record in snapshot.records {
            if record.key.trading_day == trading_day {
                index.upsert(record);
            }
        }
        for lock in snapshot.range_locks {
            if lock.trading_day == trading_day {
                index.range_locks.entry(lock.stream_id.clone()).or_insert(lock);
            }
        }
        info!(
            trading_day = %trading_day,
            lines,
            records = index.records.len(),
            range_locks = index.range_locks.len(),
            "journal opened"
        );
        Ok(Self { trading_day, store, index: Mutex::new(index) })
    }

    pub fn trading_day(&self) -> TradingDay {
        self.trading_day
    }

    pub fn is_submitted(
        &self,
        trading_day: TradingDay,
        stream_id: &StreamId,
        intent_id: &IntentId,
    ) -> bool {
        let key = JournalKey {
            trading_day,
            stream_id: stream_id.clone(),
            intent_id: intent_id.clone(),
        };
        self.index.lock().records.contains_key(&key)
    }

    pub fn known_intent(&self, intent_id: &IntentId) -> bool {
        self.index.lock().by_intent.contains_key(intent_id)
    }

    pub fn get(&self, intent_id: &IntentId) -> Option<JournalRecord> {
        self.index.lock().get(intent_id).cloned()
    }

    /// All records of one stream, oldest submission first.
    pub fn records_for_stream(&self, stream_id: &StreamId) -> Vec<JournalRecord> {
        let index = self.index.lock();
        let mut out: Vec<JournalRecord> =
            index.records.values().filter(|r| &r.key.stream_id == stream_id).cloned().collect();
        out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.key.cmp(&b.key)));
        out
    }

    pub fn all_records(&self) -> Vec<JournalRecord> {
        let index = self.index.lock();
        let mut out: Vec<JournalRecord> = index.records.values().cloned().collect();
        out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then_with(|| a.key.cmp(&b.key)));
        out
    }

    /// Atomic check-then-record. Either claims the submission (record
    /// persisted as SUBMITTED) or reports the existing record.
    pub fn record_submission(
        &self,
        intent: &Intent,
        now: DateTime<Utc>,
    ) -> Result<SubmissionClaim, JournalError> {
        if intent.trading_day != self.trading_day {
            return Err(JournalError::WrongTradingDay {
                found: intent.trading_day,
                expected: self.trading_day,
            });
        }
        let intent_id = intent.intent_id();
        let mut index = self.index.lock();

        if let Some(existing) = index.get(&intent_id) {
            if existing.key.stream_id != intent.stream_id
                || !existing.intent.canonically_equal(intent)
            {
                let detail = format!(
                    "journaled {} intent for stream {} differs from recomputed for stream {}",
                    existing.intent.role, existing.key.stream_id, intent.stream_id
                );
                error!(
                    intent_id = %intent_id,
                    %detail,
                    "idempotency violation; original record kept"
                );
                return Err(JournalError::IdempotencyViolation { intent_id, detail });
            }
            debug!(
                intent_id = %intent_id.short(),
                state = %existing.state,
                "submission already journaled"
            );
            return Ok(SubmissionClaim::AlreadySubmitted(existing.clone()));
        }

        let record = JournalRecord::submitted(intent.clone(), now);
        self.store.append_record(&record)?;
        index.upsert(record.clone());
        info!(
            trading_day = %record.key.trading_day,
            stream_id = %record.key.stream_id,
            intent_id = %intent_id.short(),
            role = %intent.role,
            "submission journaled"
        );
        Ok(SubmissionClaim::Claimed(record))
    }

    /// Record the broker's order id. Repeating the same id is a no-op.
    pub fn record_ack(
        &self,
        intent_id: &IntentId,
        broker_order_id: &BrokerOrderId,
        now: DateTime<Utc>,
    ) -> Result<JournalRecord, JournalError> {
        let mut index = self.index.lock();
        let current = index
            .get(intent_id)
            .cloned()
            .ok_or_else(|| JournalError::UnknownIntent(intent_id.clone()))?;

        if let Some(existing) = &current.broker_order_id {
            if existing == broker_order_id {
                return Ok(current);
            }
            return Err(JournalError::BrokerOrderIdChanged {
                intent_id: intent_id.clone(),
                existing: existing.clone(),
                new: broker_order_id.clone(),
            });
        }
        if let Some(owner) = index.broker_ids.get(broker_order_id) {
            if owner != intent_id {
                return Err(JournalError::DuplicateBrokerOrderId {
                    broker_order_id: broker_order_id.clone(),
                    existing: owner.clone(),
                });
            }
        }

        let mut updated = current;
        updated.broker_order_id = Some(broker_order_id.clone());
        if updated.state == JournalState::Submitted {
            updated.state = JournalState::Acknowledged;
        }
        updated.updated_at = now;
        self.commit(&mut index, updated)
    }

    pub fn record_partial_fill(
        &self,
        intent_id: &IntentId,
        price: f64,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<JournalRecord, JournalError> {
        let mut index = self.index.lock();
        let current = index
            .get(intent_id)
            .cloned()
            .ok_or_else(|| JournalError::UnknownIntent(intent_id.clone()))?;
        Self::check_transition(&current, JournalState::PartiallyFilled)?;

        let mut updated = current;
        let prior_qty = updated.filled_quantity as f64;
        let total = updated.filled_quantity + quantity;
        let prior_price = updated.fill_price.unwrap_or(price);
        if total > 0 {
            let notional = prior_price * prior_qty + price * quantity as f64;
            updated.fill_price = Some(notional / total as f64);
        }
        updated.filled_quantity = total;
        updated.state = JournalState::PartiallyFilled;
        updated.updated_at = now;
        self.commit(&mut index, updated)
    }

    /// Move a record to FILLED, REJECTED or CANCELLED.
    pub fn record_terminal(
        &self,
        intent_id: &IntentId,
        outcome: TerminalOutcome,
        now: DateTime<Utc>,
    ) -> Result<JournalRecord, JournalError> {
        let mut index = self.index.lock();
        let current = index
            .get(intent_id)
            .cloned()
            .ok_or_else(|| JournalError::UnknownIntent(intent_id.clone()))?;
        Self::check_transition(&current, outcome.state())?;

        let mut updated = current;
        updated.state = outcome.state();
        updated.updated_at = now;
        match outcome {
            TerminalOutcome::Filled { price, quantity } => {
                updated.fill_price = Some(price);
                updated.filled_quantity = quantity.max(updated.filled_quantity);
            }
            TerminalOutcome::Rejected { reason } => updated.rejection_reason = Some(reason),
            TerminalOutcome::Cancelled => {}
        }
        self.commit(&mut index, updated)
    }

    pub fn range_lock(&self, stream_id: &StreamId) -> Option<RangeLockRecord> {
        self.index.lock().range_locks.get(stream_id).cloned()
    }

    /// Claim the one range-lock entry for `(day, stream)`. A second claim
    /// returns the persisted values untouched.
    pub fn claim_range_lock(&self, lock: RangeLockRecord) -> Result<RangeLockClaim, JournalError> {
        if lock.trading_day != self.trading_day {
            return Err(JournalError::WrongTradingDay {
                found: lock.trading_day,
                expected: self.trading_day,
            });
        }
        let mut index = self.index.lock();
        if let Some(existing) = index.range_locks.get(&lock.stream_id) {
            return Ok(RangeLockClaim::Existing(existing.clone()));
        }
        self.store.append_range_lock(&lock)?;
        index.range_locks.insert(lock.stream_id.clone(), lock.clone());
        Ok(RangeLockClaim::Fresh(lock))
    }

    /// Distinct broker order ids recorded so far.
    pub fn broker_order_ids(&self) -> Vec<BrokerOrderId> {
        self.index.lock().broker_ids.keys().cloned().collect()
    }

    pub fn archive(&self) -> Result<(), JournalError> {
        self.store.archive(self.trading_day)?;
        info!(trading_day = %self.trading_day, "journal archived");
        Ok(())
    }

    fn check_transition(current: &JournalRecord, next: JournalState) -> Result<(), JournalError> {
        if current.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(JournalError::IllegalTransition {
                intent_id: current.key.intent_id.clone(),
                state: current.state,
                next,
            })
        }
    }

    fn commit(
        &self,
        index: &mut JournalIndex,
        updated: JournalRecord,
    ) -> Result<JournalRecord, JournalError> {
        self.store.append_record(&updated)?;
        debug!(
            intent_id = %updated.key.intent_id.short(),
            state = %updated.state,
            "journal record updated"
        );
        index.upsert(updated.clone());
        Ok(updated)
    }
}

impl std::fmt::Debug for ExecutionJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionJournal")
            .field("trading_day", &self.trading_day)
            .field("records", &self.index.lock().records.len())
            .finish()
    }
}
