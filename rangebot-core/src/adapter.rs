//! External collaborators the core consumes: the execution adapter and the
//! bar provider.
//!
//! Both traits are synchronous and `Send + Sync`. Hosts that talk to an
//! async broker wrap the client so each call is bounded by a hard timeout
//! and a timeout comes back as [`AdapterError::Timeout`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Bar, BrokerOrderId, IntentId, OrderRequest, OrderRole};

/// Convenience alias for adapter results.
pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdapterError {
    /// Broker refused the order (business rejection).
    #[error("order rejected: {0}")]
    Rejected(String),

    /// The call did not complete within the configured bound.
    #[error("adapter call timed out after {0} ms")]
    Timeout(u64),

    #[error("broker disconnected: {0}")]
    Disconnected(String),

    #[error("adapter error: {0}")]
    Other(String),
}

/// Closed set of connection states reported at the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Lost,
    Disconnected,
    Error,
}

/// Synchronous acceptance of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerAck {
    pub broker_order_id: BrokerOrderId,
}

/// One working order as the broker sees it during state sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub broker_order_id: BrokerOrderId,
    pub instrument: String,
    /// The tag supplied at submission, if the broker kept it.
    pub intent_id: Option<IntentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub open_orders: Vec<BrokerOrder>,
}

/// Order placement interface. Fill/ack/reject notifications arrive later as
/// [`crate::domain::ExecutionUpdate`]s carrying the request's intent id.
pub trait ExecutionAdapter: Send + Sync {
    fn submit_entry(&self, request: &OrderRequest) -> AdapterResult<BrokerAck>;

    fn submit_protective_stop(&self, request: &OrderRequest) -> AdapterResult<BrokerAck>;

    fn submit_target(&self, request: &OrderRequest) -> AdapterResult<BrokerAck>;

    /// Replace the working stop (`request.replaces`) with a stop at `request.price`.
    fn modify_stop_to_break_even(&self, request: &OrderRequest) -> AdapterResult<BrokerAck>;

    /// Close the position at market and cancel the stream's working orders.
    fn flatten(&self, request: &OrderRequest) -> AdapterResult<BrokerAck>;

    /// Broker's current view of working orders, used after reconnect.
    fn sync_state(&self) -> AdapterResult<BrokerSnapshot>;
}

/// Route a request to the adapter method for its role.
pub fn dispatch(
    adapter: &dyn ExecutionAdapter,
    request: &OrderRequest,
) -> AdapterResult<BrokerAck> {
    match request.role {
        OrderRole::Entry => adapter.submit_entry(request),
        OrderRole::ProtectiveStop => adapter.submit_protective_stop(request),
        OrderRole::Target => adapter.submit_target(request),
        OrderRole::BreakEvenStop => adapter.modify_stop_to_break_even(request),
        OrderRole::Flatten => adapter.flatten(request),
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BarSourceError {
    #[error("no bar data for instrument '{0}'")]
    UnknownInstrument(String),

    #[error("bar source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed bar data: {0}")]
    Malformed(String),
}

/// Historical bars for hydration. Returns bars with
/// `start <= timestamp < end`, sorted ascending.
pub trait BarProvider: Send + Sync {
    fn get_bars(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BarSourceError>;
}
