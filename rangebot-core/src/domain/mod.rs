//! Domain types for the range breakout robot

pub mod bar;
pub mod ids;
pub mod instrument;
pub mod intent;
pub mod order;

pub use bar::Bar;
pub use ids::{BrokerOrderId, IntentId, StreamId, StreamKey, TradingDay};
pub use instrument::{Instrument, InstrumentError};
pub use intent::{Intent, IntentTemplate};
pub use order::{Direction, ExecutionUpdate, OrderRequest, OrderRole, OrderSide, UpdateKind};

/// Symbol type alias
pub type Symbol = String;
