//! Broker bridge: the core's synchronous adapter trait over an async
//! broker client, with every call bounded by a hard timeout.
//!
//! The engine runs on a plain OS thread (see [`crate::actor`]), so each
//! adapter call blocks that thread on the runtime handle while the client
//! future runs. A call that exceeds the bound comes back as
//! [`AdapterError::Timeout`]: failed, never hung.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::warn;

use rangebot_core::adapter::{
    AdapterError, AdapterResult, BrokerAck, BrokerSnapshot, ExecutionAdapter,
};
use rangebot_core::domain::OrderRequest;

/// Async order API of a concrete broker connection.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Place an entry, protective stop or target.
    async fn place(&self, request: &OrderRequest) -> AdapterResult<BrokerAck>;

    /// Replace the working stop named by `request.replaces`.
    async fn replace_stop(&self, request: &OrderRequest) -> AdapterResult<BrokerAck>;

    /// Close the stream's position at market and cancel its working orders.
    async fn flatten(&self, request: &OrderRequest) -> AdapterResult<BrokerAck>;

    async fn open_orders(&self) -> AdapterResult<BrokerSnapshot>;
}

pub struct BrokerBridge<C> {
    client: Arc<C>,
    handle: Handle,
    timeout: Duration,
}

impl<C: BrokerClient> BrokerBridge<C> {
    pub fn new(client: Arc<C>, handle: Handle, timeout: Duration) -> Self {
        Self { client, handle, timeout }
    }

    fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = AdapterResult<T>>,
    ) -> AdapterResult<T> {
        let ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        match self.handle.block_on(async { tokio::time::timeout(self.timeout, fut).await }) {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout_ms = ms, "broker call timed out");
                Err(AdapterError::Timeout(ms))
            }
        }
    }
}

impl<C: BrokerClient> ExecutionAdapter for BrokerBridge<C> {
    fn submit_entry(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.call("submit_entry", self.client.place(request))
    }

    fn submit_protective_stop(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.call("submit_protective_stop", self.client.place(request))
    }

    fn submit_target(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.call("submit_target", self.client.place(request))
    }

    fn modify_stop_to_break_even(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.call("modify_stop_to_break_even", self.client.replace_stop(request))
    }

    fn flatten(&self, request: &OrderRequest) -> AdapterResult<BrokerAck> {
        self.call("flatten", self.client.flatten(request))
    }

    fn sync_state(&self) -> AdapterResult<BrokerSnapshot> {
        self.call("sync_state", self.client.open_orders())
    }
}

impl<C> std::fmt::Debug for BrokerBridge<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBridge").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}
