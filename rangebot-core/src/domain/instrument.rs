use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tick rounding direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TickPolicy {
    /// Round to nearest tick
    RoundNearest,
    /// Round toward negative infinity
    RoundDown,
    /// Round toward positive infinity
    RoundUp,
}

/// Tolerance used when deciding whether a price already sits on a tick.
const TICK_EPSILON: f64 = 1e-9;

/// Instrument metadata needed for price arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub tick_size: f64,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, tick_size: f64) -> Result<Self, InstrumentError> {
        let symbol = symbol.into();
        if !(tick_size.is_finite() && tick_size > 0.0) {
            return Err(InstrumentError::InvalidTickSize { symbol, tick_size });
        }
        Ok(Self { symbol, tick_size })
    }

    /// Round price according to policy
    pub fn round_price(&self, price: f64, policy: TickPolicy) -> f64 {
        self.ticks_to_price(self.price_to_ticks_with(price, policy))
    }

    /// Round to the nearest tick.
    pub fn round_to_tick(&self, price: f64) -> f64 {
        self.round_price(price, TickPolicy::RoundNearest)
    }

    /// Integer tick count of a price (nearest). Used wherever prices must
    /// compare or hash exactly.
    pub fn price_to_ticks(&self, price: f64) -> i64 {
        self.price_to_ticks_with(price, TickPolicy::RoundNearest)
    }

    fn price_to_ticks_with(&self, price: f64, policy: TickPolicy) -> i64 {
        let ticks = price / self.tick_size;
        let rounded = match policy {
            TickPolicy::RoundNearest => ticks.round(),
            TickPolicy::RoundDown => (ticks + TICK_EPSILON).floor(),
            TickPolicy::RoundUp => (ticks - TICK_EPSILON).ceil(),
        };
        rounded as i64
    }

    pub fn ticks_to_price(&self, ticks: i64) -> f64 {
        ticks as f64 * self.tick_size
    }

    /// One tick above (`steps > 0`) or below a price, snapped to the grid.
    pub fn offset_ticks(&self, price: f64, steps: i64) -> f64 {
        self.ticks_to_price(self.price_to_ticks(price) + steps)
    }

    /// Whether a price already sits on the tick grid.
    pub fn is_tick_aligned(&self, price: f64) -> bool {
        let ticks = price / self.tick_size;
        (ticks - ticks.round()).abs() <= 1e-6
    }

    /// Validate price respects tick size
    pub fn validate_price(&self, price: f64) -> Result<f64, InstrumentError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(InstrumentError::InvalidPrice { price });
        }
        if !self.is_tick_aligned(price) {
            return Err(InstrumentError::OffTick { price, tick_size: self.tick_size });
        }
        Ok(self.round_to_tick(price))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InstrumentError {
    #[error("instrument {symbol}: tick_size must be positive and finite, got {tick_size}")]
    InvalidTickSize { symbol: String, tick_size: f64 },

    #[error("price {price} does not respect tick_size {tick_size}")]
    OffTick { price: f64, tick_size: f64 },

    #[error("price {price} is not a positive finite number")]
    InvalidPrice { price: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn es() -> Instrument {
        Instrument::new("ES", 0.25).unwrap()
    }

    #[test]
    fn test_tick_size_rounding() {
        let inst = es();
        assert_eq!(inst.round_to_tick(5005.10), 5005.00);
        assert_eq!(inst.round_to_tick(5005.13), 5005.25);
        assert_eq!(inst.round_price(5005.10, TickPolicy::RoundUp), 5005.25);
        assert_eq!(inst.round_price(5005.20, TickPolicy::RoundDown), 5005.00);
    }

    #[test]
    fn aligned_prices_do_not_move_under_directional_rounding() {
        let inst = es();
        assert_eq!(inst.round_price(5005.25, TickPolicy::RoundUp), 5005.25);
        assert_eq!(inst.round_price(5005.25, TickPolicy::RoundDown), 5005.25);
    }

    #[test]
    fn price_to_ticks_is_exact_for_grid_prices() {
        let inst = es();
        assert_eq!(inst.price_to_ticks(5005.25), 20021);
        assert_eq!(inst.ticks_to_price(20021), 5005.25);
        assert_eq!(inst.offset_ticks(5005.00, 1), 5005.25);
        assert_eq!(inst.offset_ticks(4995.00, -1), 4994.75);
    }

    #[test]
    fn off_tick_prices_are_rejected() {
        let inst = es();
        assert!(inst.validate_price(5005.25).is_ok());
        assert!(matches!(inst.validate_price(5005.1), Err(InstrumentError::OffTick { .. })));
        assert!(matches!(inst.validate_price(f64::NAN), Err(InstrumentError::InvalidPrice { .. })));
    }

    #[test]
    fn zero_tick_size_is_rejected() {
        assert!(Instrument::new("BAD", 0.0).is_err());
    }
}
