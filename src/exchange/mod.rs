pub mod sim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use sim::SimGateway;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Get opposite side (for protective orders)
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order kind: resting limit order or trigger-price stop order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Limit,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
}

/// Exchange order as observed. Immutable snapshot, replaced wholesale on
/// each refresh; handlers only read it.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub side: Side,
    pub kind: OrderKind,
    pub price: f64,
    /// Stop orders only.
    pub trigger_price: Option<f64>,
    pub size: f64,
    pub filled: f64,
    pub remaining: f64,
    pub timestamp: i64,
    pub status: OrderStatus,
}

/// Open position as reported by the exchange, refreshed every tick.
///
/// `is_open == false` implies `size == 0` and `is_long` is `None`. An open
/// position with `is_long == None` is an invariant violation the caller must
/// treat as fatal.
#[derive(Debug, Clone, Default)]
pub struct Position {
    pub is_open: bool,
    pub size: f64,
    pub is_long: Option<bool>,
    pub entry_price: f64,
    pub leverage: f64,
}

/// Static per-instrument metadata captured from the gateway once so the
/// order models stay free of gateway handles.
#[derive(Debug, Clone)]
pub struct InstrumentMeta {
    pub exchange_id: String,
    pub symbol: String,
    pub price_tick: f64,
    pub lot_step: f64,
    pub contract_multiplier: f64,
    pub maker_fee: f64,
    pub taker_fee: f64,
}

impl InstrumentMeta {
    pub fn price_to_precision(&self, price: f64) -> f64 {
        quantize(price, self.price_tick)
    }

    pub fn amount_to_precision(&self, amount: f64) -> f64 {
        quantize(amount, self.lot_step)
    }

    /// `<exchange>_<symbol>` string used in persistence keys.
    pub fn exchange_symbol(&self) -> String {
        format!("{}_{}", self.exchange_id, self.symbol)
    }
}

/// Quantize a value to the nearest step and strip float noise so quantized
/// values compare exactly.
pub fn quantize(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let scaled = (value / step).round() * step;
    (scaled * 1e10).round() / 1e10
}

/// Exchange gateway capability.
///
/// Everything the bot needs from an exchange: order/position queries, order
/// placement and cancellation, top-of-book quotes and instrument precision.
/// All calls are awaited to completion before the tick proceeds; failures
/// surface as `BotError::Gateway`.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn id(&self) -> &str;
    fn meta(&self, symbol: &str) -> InstrumentMeta;
    fn price_to_precision(&self, symbol: &str, price: f64) -> f64;
    fn amount_to_precision(&self, symbol: &str, amount: f64) -> f64;
    fn contract_multiplier(&self, symbol: &str) -> f64;
    fn maker_fee(&self) -> f64;
    fn taker_fee(&self) -> f64;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>>;
    async fn fetch_position(&self, symbol: &str) -> Result<Position>;
    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<Order>;
    /// Best (ask, bid) from the top of the order book.
    async fn ask_bid(&self, symbol: &str) -> Result<(f64, f64)>;
    async fn total_balance(&self) -> Result<f64>;
    async fn set_leverage(&self, symbol: &str, leverage: f64) -> Result<f64>;
    async fn create_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<Order>;
    async fn create_stop_order(
        &self,
        symbol: &str,
        side: Side,
        trigger_price: f64,
        size: f64,
    ) -> Result<Order>;
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert_eq!(Side::Buy.as_str(), "buy");
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(99.0026, 0.001), 99.003);
        assert_eq!(quantize(99.0024, 0.001), 99.002);
        assert_eq!(quantize(0.123456, 0.001), 0.123);
        // quantized values compare exactly
        assert_eq!(quantize(0.1 + 0.2, 0.001), quantize(0.3, 0.001));
        // zero step passes through
        assert_eq!(quantize(1.23456789, 0.0), 1.23456789);
    }

    #[test]
    fn test_meta_precision() {
        let meta = InstrumentMeta {
            exchange_id: "simex".to_string(),
            symbol: "ETH/USDT:USDT".to_string(),
            price_tick: 0.01,
            lot_step: 0.001,
            contract_multiplier: 1.0,
            maker_fee: 0.0002,
            taker_fee: 0.0006,
        };
        assert_eq!(meta.price_to_precision(1234.5678), 1234.57);
        assert_eq!(meta.amount_to_precision(0.12345), 0.123);
        assert_eq!(meta.exchange_symbol(), "simex_ETH/USDT:USDT");
    }
}
