//! Intent: the canonical, hashable description of one order a stream wants.
//!
//! The intent id is a BLAKE3 digest of a canonical JSON object built from:
//! - trading day, stream id, instrument
//! - direction and order role
//! - quantity
//! - entry / stop / target prices as integer tick counts
//!
//! Prices enter the hash as tick counts so `5005.25` and `5005.250000001`
//! (the same tick) produce the same id. The tick size itself is instrument
//! metadata and is not part of the identity.

use serde::{Deserialize, Serialize};

use super::ids::{IntentId, StreamId, TradingDay};
use super::instrument::Instrument;
use super::order::{Direction, OrderRequest, OrderRole};

/// Version tag folded into every hash so a future canonical-field change
/// cannot collide with ids journaled under the old layout.
const CANONICAL_VERSION: &str = "intent.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub trading_day: TradingDay,
    pub stream_id: StreamId,
    pub instrument: String,
    pub tick_size: f64,
    pub direction: Direction,
    pub role: OrderRole,
    pub quantity: u32,
    pub entry_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
}

impl Intent {
    /// Canonical fields as a JSON value. `serde_json::Value` objects keep
    /// keys sorted, so the rendered text is stable across runs and builds.
    pub fn canonical_fields(&self) -> serde_json::Value {
        use serde_json::json;

        let ticks = |price: Option<f64>| price.map(|p| self.ticks(p));
        json!({
            "v": CANONICAL_VERSION,
            "trading_day": self.trading_day.to_string(),
            "stream_id": self.stream_id.as_str(),
            "instrument": &self.instrument,
            "direction": self.direction.as_str(),
            "role": self.role.as_str(),
            "quantity": self.quantity,
            "entry_ticks": ticks(self.entry_price),
            "stop_ticks": ticks(self.stop_price),
            "target_ticks": ticks(self.target_price),
        })
    }

    /// Deterministic idempotency key.
    pub fn intent_id(&self) -> IntentId {
        let canonical = self.canonical_fields();
        let hash = blake3::hash(canonical.to_string().as_bytes());
        IntentId(hash.to_hex().to_string())
    }

    /// True when both intents hash the same canonical fields.
    pub fn canonically_equal(&self, other: &Intent) -> bool {
        self.canonical_fields() == other.canonical_fields()
    }

    /// The price the adapter is handed for this role.
    pub fn order_price(&self) -> Option<f64> {
        match self.role {
            OrderRole::Entry => self.entry_price,
            OrderRole::ProtectiveStop | OrderRole::BreakEvenStop => self.stop_price,
            OrderRole::Target => self.target_price,
            OrderRole::Flatten => None,
        }
    }

    pub fn to_order_request(&self) -> OrderRequest {
        OrderRequest {
            intent_id: self.intent_id(),
            trading_day: self.trading_day,
            stream_id: self.stream_id.clone(),
            instrument: self.instrument.clone(),
            role: self.role,
            side: self.role.side(self.direction),
            quantity: self.quantity,
            price: self.order_price(),
            replaces: None,
        }
    }

    fn ticks(&self, price: f64) -> i64 {
        if self.tick_size > 0.0 {
            (price / self.tick_size).round() as i64
        } else {
            // Degenerate tick size: fall back to hundredths so the hash is
            // still defined; completeness gating rejects such intents anyway.
            (price * 100.0).round() as i64
        }
    }
}

/// Builder for the intents a stream derives from one trade plan.
#[derive(Debug, Clone)]
pub struct IntentTemplate {
    pub trading_day: TradingDay,
    pub stream_id: StreamId,
    pub instrument: Instrument,
    pub direction: Direction,
    pub quantity: u32,
    pub entry_price: f64,
}

impl IntentTemplate {
    fn base(&self, role: OrderRole) -> Intent {
        Intent {
            trading_day: self.trading_day,
            stream_id: self.stream_id.clone(),
            instrument: self.instrument.symbol.clone(),
            tick_size: self.instrument.tick_size,
            direction: self.direction,
            role,
            quantity: self.quantity,
            entry_price: Some(self.entry_price),
            stop_price: None,
            target_price: None,
        }
    }

    pub fn entry(&self, stop: f64, target: f64) -> Intent {
        Intent { stop_price: Some(stop), target_price: Some(target), ..self.base(OrderRole::Entry) }
    }

    pub fn protective_stop(&self, stop: f64) -> Intent {
        Intent { stop_price: Some(stop), ..self.base(OrderRole::ProtectiveStop) }
    }

    pub fn target(&self, target: f64) -> Intent {
        Intent { target_price: Some(target), ..self.base(OrderRole::Target) }
    }

    pub fn break_even(&self, new_stop: f64) -> Intent {
        Intent { stop_price: Some(new_stop), ..self.base(OrderRole::BreakEvenStop) }
    }

    pub fn flatten(&self) -> Intent {
        self.base(OrderRole::Flatten)
    }
}
