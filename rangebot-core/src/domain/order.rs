//! Order-side vocabulary shared by streams, the journal and adapters.

use serde::{Deserialize, Serialize};

use super::ids::{BrokerOrderId, IntentId, StreamId, TradingDay};

/// Trade direction of a stream's single position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// What an order does for the stream's trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderRole {
    Entry,
    ProtectiveStop,
    Target,
    BreakEvenStop,
    Flatten,
}

impl OrderRole {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderRole::Entry => "ENTRY",
            OrderRole::ProtectiveStop => "PROTECTIVE_STOP",
            OrderRole::Target => "TARGET",
            OrderRole::BreakEvenStop => "BREAK_EVEN_STOP",
            OrderRole::Flatten => "FLATTEN",
        }
    }

    /// Side of the order for a position in `direction`: entries trade with
    /// the direction, every other role closes the position.
    pub fn side(self, direction: Direction) -> OrderSide {
        match (self, direction) {
            (OrderRole::Entry, Direction::Long) => OrderSide::Buy,
            (OrderRole::Entry, Direction::Short) => OrderSide::Sell,
            (_, Direction::Long) => OrderSide::Sell,
            (_, Direction::Short) => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The order an adapter is asked to place, tagged with the intent id that
/// every later callback must carry back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub intent_id: IntentId,
    pub trading_day: TradingDay,
    pub stream_id: StreamId,
    pub instrument: String,
    pub role: OrderRole,
    pub side: OrderSide,
    pub quantity: u32,
    /// Reference price: entry price for entries, trigger for stops, limit
    /// for targets. `None` for flatten (market).
    pub price: Option<f64>,
    /// Broker id of the working order this request replaces (break-even modify).
    pub replaces: Option<BrokerOrderId>,
}

/// Asynchronous broker notification, correlated by intent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    pub intent_id: IntentId,
    pub kind: UpdateKind,
}

impl ExecutionUpdate {
    pub fn new(intent_id: IntentId, kind: UpdateKind) -> Self {
        Self { intent_id, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateKind {
    Acknowledged { broker_order_id: BrokerOrderId },
    PartiallyFilled { price: f64, quantity: u32 },
    Filled { price: f64, quantity: u32 },
    Rejected { reason: String },
    Cancelled,
}
