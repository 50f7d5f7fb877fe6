//! In-memory collaborators for tests, benches and dry runs: an adapter that
//! records every request and a bar provider over fixed series.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::adapter::{
    AdapterError, AdapterResult, BarProvider, BarSourceError, BrokerAck, BrokerSnapshot,
    ExecutionAdapter,
};
use crate::domain::{Bar, BrokerOrderId, OrderRequest, OrderRole};

/// Accepts every order with a fresh `B<n>` id unless told otherwise.
#[derive(Debug, Default)]
pub struct RecordingAdapter {
    calls: Mutex<Vec<OrderRequest>>,
    reject_roles: Mutex<BTreeSet<OrderRole>>,
    fail_with: Mutex<Option<AdapterError>>,
    snapshot: Mutex<BrokerSnapshot>,
    sync_error: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call that reached the adapter, accepted or not.
    pub fn calls(&self) -> Vec<OrderRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, role: OrderRole) -> Vec<OrderRequest> {
        self.calls.lock().iter().filter(|r| r.role == role).cloned().collect()
    }

    pub fn reject_role(&self, role: OrderRole) {
        self.reject_roles.lock().insert(role);
    }

    pub fn fail_all(&self, error: AdapterError) {
        *self.fail_with.lock() = Some(error);
    }

    pub fn clear_failures(&self) {
        self.reject_roles.lock().clear();
        *self.fail_with.lock() = None;
    }

    pub fn set_snapshot(&self, snapshot: BrokerSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn fail_sync(&self, reason: Option<String>) {
        *self.sync_error.lock() = reason;
    }

    fn accept(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.calls.lock().push(request.clone());
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }
        if self.reject_roles.lock().contains(&request.role) {
            return Err(AdapterError::Rejected(format!("{} refused", request.role)));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(BrokerAck { broker_order_id: BrokerOrderId::new(format!("B{n}")) })
    }
}

impl ExecutionAdapter for RecordingAdapter {
    fn submit_entry(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.accept(request)
    }

    fn submit_protective_stop(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.accept(request)
    }

    fn submit_target(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.accept(request)
    }

    fn modify_stop_to_break_even(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.accept(request)
    }

    fn flatten(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.accept(request)
    }

    fn sync_state(&self) -> AdapterResult<BrokerSnapshot> {
        match self.sync_error.lock().clone() {
            Some(reason) => Err(AdapterError::Disconnected(reason)),
            None => Ok(self.snapshot.lock().clone()),
        }
    }
}

/// Fixed bar series per instrument.
#[derive(Debug, Default)]
pub struct StaticBars {
    series: Mutex<BTreeMap<String, Vec<Bar>>>,
    unavailable: AtomicBool,
}

impl StaticBars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(instrument: &str, bars: Vec<Bar>) -> Self {
        let source = Self::new();
        source.series.lock().insert(instrument.to_string(), bars);
        source
    }

    pub fn push(&self, instrument: &str, bar: Bar) {
        self.series.lock().entry(instrument.to_string()).or_default().push(bar);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl BarProvider for StaticBars {
    fn get_bars(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BarSourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BarSourceError::Unavailable("static source switched off".into()));
        }
        let series = self.series.lock();
        let mut bars: Vec<Bar> = series
            .get(instrument)
            .map(|all| {
                all.iter()
                    .filter(|b| b.timestamp >= start && b.timestamp < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }
}
