//! Fixed-percentage take-profit / stop-loss model.
//!
//! The simplest order model: protective levels at fixed offsets around the
//! entry price, one risk-sized entry order. Signals may override the offsets
//! by proposing explicit prices; those are handled by the caller.

use crate::error::{BotError, Result};
use crate::exchange::InstrumentMeta;

use super::Direction;

#[derive(Debug)]
pub struct FixedTpslModel {
    meta: InstrumentMeta,
    direction: Direction,
    tp_pct: f64,
    sl_pct: f64,
    trail_trigger_pct: f64,
    trail_value_pct: f64,
}

impl FixedTpslModel {
    pub fn new(
        meta: InstrumentMeta,
        direction: Direction,
        tp_pct: f64,
        sl_pct: f64,
        trail_trigger_pct: f64,
        trail_value_pct: f64,
    ) -> Self {
        Self {
            meta,
            direction,
            tp_pct,
            sl_pct,
            trail_trigger_pct,
            trail_value_pct,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn stop_price_size(&self, input_size: f64, input_price: f64) -> (f64, f64) {
        let price = match self.direction {
            Direction::Long => input_price * (1.0 - self.sl_pct),
            Direction::Short => input_price * (1.0 + self.sl_pct),
        };
        (self.meta.price_to_precision(price), input_size)
    }

    pub fn take_profit_price_size(&self, input_size: f64, input_price: f64) -> (f64, f64) {
        let price = match self.direction {
            Direction::Long => input_price * (1.0 + self.tp_pct),
            Direction::Short => input_price * (1.0 - self.tp_pct),
        };
        (self.meta.price_to_precision(price), input_size)
    }

    /// Entry size in contracts so that a fill at `asset_price` stopped out at
    /// the fixed stop level loses `risk_per_trade`.
    pub fn order_size(&self, asset_price: f64, risk_per_trade: f64) -> Result<f64> {
        let (sl_price, _) = self.stop_price_size(0.0, asset_price);
        let delta = (asset_price - sl_price).abs();
        if delta <= 0.0 {
            return Err(BotError::DegenerateRisk(format!(
                "delta between stop price {sl_price} and asset price {asset_price} is zero"
            )));
        }
        let amount = risk_per_trade / delta;
        let size = amount / self.meta.contract_multiplier;
        Ok(self.meta.amount_to_precision(size))
    }

    /// Trailing stop activation: arm at a fixed offset past the entry, trail
    /// by a fixed fraction of the entry price.
    pub fn trailing_trigger(&self, entry_price: f64) -> (f64, f64) {
        let trigger = match self.direction {
            Direction::Long => entry_price * (1.0 + self.trail_trigger_pct),
            Direction::Short => entry_price * (1.0 - self.trail_trigger_pct),
        };
        let value = entry_price * self.trail_value_pct;
        (
            self.meta.price_to_precision(trigger),
            self.meta.price_to_precision(value),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_meta() -> InstrumentMeta {
        InstrumentMeta {
            exchange_id: "simex".to_string(),
            symbol: "ETH/USDT:USDT".to_string(),
            price_tick: 0.01,
            lot_step: 0.001,
            contract_multiplier: 1.0,
            maker_fee: 0.0002,
            taker_fee: 0.0006,
        }
    }

    fn long_model() -> FixedTpslModel {
        FixedTpslModel::new(test_meta(), Direction::Long, 0.01, 0.0066, 0.005, 0.002)
    }

    #[test]
    fn test_long_levels() {
        let model = long_model();
        let (sl, sl_size) = model.stop_price_size(2.0, 100.0);
        let (tp, tp_size) = model.take_profit_price_size(2.0, 100.0);
        assert_eq!(sl, 99.34);
        assert_eq!(tp, 101.0);
        assert_eq!(sl_size, 2.0);
        assert_eq!(tp_size, 2.0);
    }

    #[test]
    fn test_short_levels_mirror() {
        let model =
            FixedTpslModel::new(test_meta(), Direction::Short, 0.01, 0.0066, 0.005, 0.002);
        let (sl, _) = model.stop_price_size(2.0, 100.0);
        let (tp, _) = model.take_profit_price_size(2.0, 100.0);
        assert_eq!(sl, 100.66);
        assert_eq!(tp, 99.0);
    }

    #[test]
    fn test_order_size_matches_risk() {
        let model = long_model();
        let size = model.order_size(100.0, 10.0).unwrap();
        let (sl, _) = model.stop_price_size(size, 100.0);
        let loss = size * (100.0 - sl);
        assert!((loss - 10.0).abs() < 0.05);
    }

    #[test]
    fn test_zero_stop_distance_is_degenerate() {
        let model =
            FixedTpslModel::new(test_meta(), Direction::Long, 0.01, 0.0, 0.005, 0.002);
        assert!(matches!(
            model.order_size(100.0, 10.0),
            Err(BotError::DegenerateRisk(_))
        ));
    }

    #[test]
    fn test_trailing_trigger_offsets() {
        let model = long_model();
        let (trigger, value) = model.trailing_trigger(100.0);
        assert_eq!(trigger, 100.5);
        assert_eq!(value, 0.2);
    }
}
