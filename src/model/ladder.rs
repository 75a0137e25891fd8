//! DCA ladder order model.
//!
//! A ladder is a sequence of entry orders at geometrically increasing price
//! deviation from a reference price, sized to average down, terminated by a
//! single stop-loss row. Two scalars derived once from a unit-input pass
//! (`delta_factor`, `size_divisor`) let the risk budget be converted into a
//! base order size without rebuilding the whole table.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BotError, Result};
use crate::exchange::{InstrumentMeta, OrderKind, Side};

use super::store::LadderStore;
use super::Direction;

/// Shape parameters of a ladder, fixed at construction.
#[derive(Debug, Clone)]
pub struct LadderParams {
    /// Total rows including the final stop row. At least 3.
    pub num_rungs: usize,
    /// Per-step fractional price deviation.
    pub price_dev: f64,
    /// Size multiplier applied to each rescue rung after the first.
    pub save_scale: f64,
    /// First rescue rung size relative to the base rung.
    pub base_to_save_mult: f64,
}

/// One persisted row of the ladder table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderRung {
    pub index: usize,
    pub kind: OrderKind,
    pub direction: Side,
    pub exchange_id: String,
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    /// Position size once this rung and all rungs before it have filled.
    pub cum_size: f64,
    /// Notional of this rung alone.
    pub volume: f64,
    /// Cumulative notional up to and including this rung.
    pub open_volume: f64,
    pub maker_fee: f64,
    /// Stop row only.
    pub taker_fee: Option<f64>,
    /// Average entry price with this rung filled.
    pub entry_price: f64,
    /// Notional of closing the cumulative position at this rung's price.
    pub close_volume: f64,
    pub unrealized_pnl: f64,
    pub tp_volume: Option<f64>,
    pub tp_maker_fee: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub tp_price: Option<f64>,
    pub tp_price_min_roe: Option<f64>,
    pub tp_price_min_trigger: Option<f64>,
    pub crv: Option<f64>,
    pub roi: Option<f64>,
    pub roe: Option<f64>,
    pub order_id: Option<String>,
    pub tp_order_id: Option<String>,
}

/// Seed row produced by the coefficient walk, before the economics columns.
#[derive(Debug, Clone)]
struct RungSeed {
    index: usize,
    kind: OrderKind,
    direction: Side,
    price: f64,
    size: f64,
    cum_size: f64,
    volume: f64,
    open_volume: f64,
}

#[derive(Debug)]
pub struct LadderModel {
    meta: InstrumentMeta,
    direction: Direction,
    params: LadderParams,
    /// Average entry price divided by the stop price, from the unit pass.
    delta_factor: f64,
    /// Total ladder size per unit of base size, from the unit pass.
    size_divisor: f64,
    rows: Option<Vec<LadderRung>>,
    file_save_name: Option<String>,
}

impl LadderModel {
    pub fn new(meta: InstrumentMeta, direction: Direction, params: LadderParams) -> Result<Self> {
        if params.num_rungs < 3 {
            return Err(BotError::Invariant(format!(
                "number of ladder rungs {} too small, must be at least 3",
                params.num_rungs
            )));
        }
        if params.price_dev <= 0.0 {
            return Err(BotError::Invariant(format!(
                "price deviation {} must be positive",
                params.price_dev
            )));
        }

        let mut model = Self {
            meta,
            direction,
            params,
            delta_factor: 0.0,
            size_divisor: 0.0,
            rows: None,
            file_save_name: None,
        };
        // unit inputs, raw prices: yields the two reusable scalars
        let (delta, total_size, _) = model.coefficients(1.0, 1.0, true);
        model.delta_factor = delta;
        model.size_divisor = total_size;
        Ok(model)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn params(&self) -> &LadderParams {
        &self.params
    }

    pub fn delta_factor(&self) -> f64 {
        self.delta_factor
    }

    pub fn size_divisor(&self) -> f64 {
        self.size_divisor
    }

    pub fn is_built(&self) -> bool {
        self.rows.is_some()
    }

    pub fn rows(&self) -> Option<&[LadderRung]> {
        self.rows.as_deref()
    }

    pub fn clear(&mut self) {
        self.rows = None;
    }

    /// Price after `period` steps of deviation away from `asset_price`.
    fn price_after_periods(&self, period: usize, asset_price: f64, raw: bool) -> f64 {
        let factor = match self.direction {
            Direction::Long => 1.0 - self.params.price_dev,
            Direction::Short => 1.0 + self.params.price_dev,
        };
        let price = asset_price * factor.powi(period as i32);
        if raw {
            price
        } else {
            self.meta.price_to_precision(price)
        }
    }

    /// Walk the ladder once: prices, sizes, cumulative size and volume.
    /// Returns `(delta_factor, total_size, seeds)`.
    fn coefficients(&self, base_size: f64, asset_price: f64, raw: bool) -> (f64, f64, Vec<RungSeed>) {
        let n = self.params.num_rungs;
        let save_size = base_size * self.params.base_to_save_mult;

        let mut size = 0.0_f64;
        let mut cum_size = 0.0_f64;
        let mut cum_volume = 0.0_f64;
        let mut seeds = Vec::with_capacity(n);

        let mut side = self.direction.entry_side();
        let mut kind = OrderKind::Limit;
        let mut last_price = asset_price;

        for index in 0..n {
            let price = self.price_after_periods(index, asset_price, raw);

            if index == 0 {
                size = base_size;
            }
            if index == 1 {
                size = save_size;
            }
            if index > 1 && index < n - 1 {
                size *= self.params.save_scale;
            }
            // last row is the stop loss, no new exposure, direction flips
            if index == n - 1 {
                size = 0.0;
                kind = OrderKind::Stop;
                side = self.direction.exit_side();
            }

            let volume = size * price * self.meta.contract_multiplier;
            cum_size += size;
            cum_volume += volume;
            last_price = price;

            seeds.push(RungSeed {
                index,
                kind,
                direction: side,
                price,
                size,
                cum_size,
                volume,
                open_volume: cum_volume,
            });
        }

        let avg_entry: f64 =
            seeds.iter().map(|s| s.price * s.size).sum::<f64>() / cum_size;
        let delta = avg_entry / last_price;

        debug!(
            symbol = %self.meta.symbol,
            avg_entry,
            total_size = cum_size,
            last_price,
            delta,
            "ladder coefficients"
        );

        (delta, cum_size, seeds)
    }

    /// Risk-oriented base size in contracts: sizes the whole ladder so that
    /// a full fill followed by the stop losing `risk_per_trade`.
    pub fn base_size(&self, asset_price: f64, risk_per_trade: f64) -> Result<f64> {
        let periods = self.params.num_rungs - 1;
        let sl_price = self.price_after_periods(periods, asset_price, false);
        let avg_entry_price = sl_price * self.delta_factor;

        let price_delta = (avg_entry_price - sl_price).abs();
        if price_delta <= 0.0 {
            return Err(BotError::DegenerateRisk(format!(
                "delta between stop price {sl_price} and average entry price {avg_entry_price} is zero"
            )));
        }

        let total_size = risk_per_trade / price_delta;
        let base_size = total_size / self.size_divisor / self.meta.contract_multiplier;

        debug!(
            symbol = %self.meta.symbol,
            sl_price,
            avg_entry_price,
            price_delta,
            base_size,
            "ladder base size"
        );

        Ok(base_size)
    }

    /// Build the full row table for the given risk inputs.
    ///
    /// Fees are applied after sizing, so the realized reward/risk comes out
    /// slightly below `reward_risk_ratio`. The short side scales its fee term
    /// by `min_roe_trigger_distance`; the long side does not. That asymmetry
    /// is inherited behavior, kept until its intent is confirmed.
    pub fn build(
        &mut self,
        asset_price: f64,
        risk_per_trade: f64,
        reward_risk_ratio: f64,
        leverage: f64,
        min_roe: f64,
        min_roe_trigger_distance: f64,
    ) -> Result<()> {
        let base_size = self
            .meta
            .amount_to_precision(self.base_size(asset_price, risk_per_trade)?);
        let (_, _, seeds) = self.coefficients(base_size, asset_price, false);

        let maker = self.meta.maker_fee;
        let taker = self.meta.taker_fee;
        let cm = self.meta.contract_multiplier;
        let n = seeds.len();

        // forward pass: per-row unrealized pnl, needed one row ahead below
        let unrealized: Vec<f64> = seeds
            .iter()
            .map(|s| {
                let close_volume = s.price * s.cum_size * cm;
                let maker_fee = s.open_volume * maker;
                match self.direction {
                    Direction::Long => close_volume - s.open_volume - maker_fee,
                    Direction::Short => s.open_volume - close_volume - maker_fee,
                }
            })
            .collect();

        let mut rows = Vec::with_capacity(n);
        for (i, seed) in seeds.iter().enumerate() {
            let close_volume = seed.price * seed.cum_size * cm;
            let maker_fee = seed.open_volume * maker;
            let entry_price = seed.open_volume / seed.cum_size / cm;
            let u_pnl = unrealized[i];
            let is_stop = seed.kind == OrderKind::Stop;
            let next_u_pnl = unrealized.get(i + 1).copied();

            let taker_fee = is_stop.then_some(close_volume * taker);

            // reward target: the next rung's loss scaled by the desired ratio
            let tp_volume = next_u_pnl.map(|next| match self.direction {
                Direction::Long => seed.open_volume + (next * reward_risk_ratio).abs(),
                Direction::Short => seed.open_volume - (next * reward_risk_ratio).abs(),
            });
            let tp_maker_fee = tp_volume.map(|v| v * maker);

            let realized_pnl = if is_stop {
                Some(u_pnl - taker_fee.unwrap_or(0.0))
            } else {
                tp_volume.map(|tp_vol| {
                    let tp_fee = tp_vol * maker;
                    match self.direction {
                        Direction::Long => (tp_vol - seed.open_volume) - (maker_fee + tp_fee),
                        Direction::Short => {
                            (seed.open_volume - tp_vol)
                                - (maker_fee + tp_fee) * min_roe_trigger_distance
                        }
                    }
                })
            };

            let tp_price = if is_stop {
                None
            } else {
                tp_volume.map(|v| v / seed.cum_size / cm)
            };

            let (tp_price_min_roe, tp_price_min_trigger) = match self.direction {
                Direction::Long => {
                    let floor = entry_price * (1.0 + min_roe / leverage + maker);
                    let trigger = floor + (floor - entry_price);
                    (Some(floor), Some(trigger))
                }
                Direction::Short => {
                    let floor = entry_price * (1.0 - min_roe / leverage - maker);
                    let trigger = floor - (entry_price - floor) * min_roe_trigger_distance;
                    (Some(floor), Some(trigger))
                }
            };

            let crv = if is_stop {
                None
            } else {
                match (realized_pnl, next_u_pnl) {
                    (Some(r), Some(next)) if next != 0.0 => Some(r / next.abs()),
                    _ => None,
                }
            };
            let roi = realized_pnl.map(|r| r / seed.open_volume);
            let roe = roi.map(|r| r * leverage);

            rows.push(LadderRung {
                index: seed.index,
                kind: seed.kind,
                direction: seed.direction,
                exchange_id: self.meta.exchange_id.clone(),
                symbol: self.meta.symbol.clone(),
                price: seed.price,
                size: seed.size,
                cum_size: seed.cum_size,
                volume: seed.volume,
                open_volume: seed.open_volume,
                maker_fee,
                taker_fee,
                entry_price,
                close_volume,
                unrealized_pnl: u_pnl,
                tp_volume,
                tp_maker_fee,
                realized_pnl,
                tp_price: self.price_or_none(tp_price),
                tp_price_min_roe: self.price_or_none(tp_price_min_roe),
                tp_price_min_trigger: self.price_or_none(tp_price_min_trigger),
                crv,
                roi,
                roe,
                order_id: None,
                tp_order_id: None,
            });
        }

        self.rows = Some(rows);
        Ok(())
    }

    /// Quantize a derived price column; non-positive prices become undefined
    /// rather than zero so they cannot be mistaken for real levels.
    fn price_or_none(&self, price: Option<f64>) -> Option<f64> {
        price.and_then(|p| (p > 0.0).then(|| self.meta.price_to_precision(p)))
    }

    /// Relative distance between the first and last ladder price.
    pub fn max_drawdown(&self) -> Option<f64> {
        let rows = self.rows.as_ref()?;
        let first = rows.first()?.price;
        let last = rows.last()?.price;
        Some((first - last).abs() / first)
    }

    /// The single stop row: (trigger price, size covering all entry rungs).
    pub fn stop_price_size(&self) -> Result<(f64, f64)> {
        let rows = self.require_rows()?;
        let stop = rows
            .iter()
            .find(|r| r.kind == OrderKind::Stop)
            .ok_or_else(|| BotError::Invariant("ladder has no stop row".to_string()))?;
        Ok((self.meta.price_to_precision(stop.price), stop.cum_size))
    }

    /// Take-profit price for however much of the ladder has actually filled:
    /// the first limit row whose cumulative size covers `input_size`. A
    /// position grown beyond the ladder (manual intervention) falls back to
    /// the deepest rung's target.
    pub fn take_profit_price_size(&self, input_size: f64) -> Result<(f64, f64)> {
        let rows = self.require_rows()?;
        let row = rows
            .iter()
            .find(|r| r.kind == OrderKind::Limit && r.cum_size >= input_size && r.tp_price.is_some())
            .or_else(|| {
                rows.iter()
                    .rev()
                    .find(|r| r.kind == OrderKind::Limit && r.tp_price.is_some())
            })
            .ok_or_else(|| {
                BotError::Invariant("ladder has no take-profit price".to_string())
            })?;
        match row.tp_price {
            Some(price) => Ok((self.meta.price_to_precision(price), input_size)),
            None => Err(BotError::Invariant(
                "ladder has no take-profit price".to_string(),
            )),
        }
    }

    /// Trailing stop activation derived from the min-ROE columns of the rung
    /// covering `input_size`: arm at the trigger level, trail by the distance
    /// back to the floor.
    pub fn trailing_trigger(&self, input_size: f64) -> Option<(f64, f64)> {
        let rows = self.rows.as_ref()?;
        let row = rows
            .iter()
            .find(|r| r.kind == OrderKind::Limit && r.cum_size >= input_size)?;
        match (row.tp_price_min_trigger, row.tp_price_min_roe) {
            (Some(trigger), Some(floor)) => {
                Some((trigger, self.meta.price_to_precision((trigger - floor).abs())))
            }
            _ => None,
        }
    }

    /// The identifier anchoring restore-after-restart: the order id stored on
    /// the last (stop) row, the longest-lasting order of the ladder.
    pub fn identifier(&self) -> Result<String> {
        let rows = self.require_rows()?;
        rows.last()
            .and_then(|r| r.order_id.clone())
            .ok_or_else(|| {
                BotError::Invariant("ladder stop row carries no order id yet".to_string())
            })
    }

    /// Last matching take-profit order id for a given position size.
    pub fn latest_tp_order_id_by_size(&self, size: f64) -> Option<String> {
        let rows = self.rows.as_ref()?;
        rows.iter()
            .find(|r| r.kind == OrderKind::Limit && r.cum_size >= size)
            .and_then(|r| r.tp_order_id.clone())
    }

    pub fn row_by_order_id(&self, order_id: &str) -> Option<&LadderRung> {
        self.rows
            .as_ref()?
            .iter()
            .find(|r| r.order_id.as_deref() == Some(order_id))
    }

    pub fn row_by_tp_order_id(&self, order_id: &str) -> Option<&LadderRung> {
        self.rows
            .as_ref()?
            .iter()
            .find(|r| r.tp_order_id.as_deref() == Some(order_id))
    }

    pub fn set_order_id(&mut self, index: usize, order_id: &str) {
        if let Some(rows) = self.rows.as_mut() {
            if let Some(row) = rows.get_mut(index) {
                row.order_id = Some(order_id.to_string());
            }
        }
    }

    /// Record a fresh take-profit order id on the rung targeting `price`.
    /// Returns whether anything changed.
    pub fn update_tp_order_id_by_price(&mut self, price: f64, order_id: &str) -> bool {
        let mut changed = false;
        if let Some(rows) = self.rows.as_mut() {
            for row in rows.iter_mut().filter(|r| r.tp_price == Some(price)) {
                if row.tp_order_id.as_deref() != Some(order_id) {
                    row.tp_order_id = Some(order_id.to_string());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Record a fresh stop order id on the rung at `price`.
    pub fn update_stop_order_id_by_price(&mut self, price: f64, order_id: &str) -> bool {
        let mut changed = false;
        if let Some(rows) = self.rows.as_mut() {
            for row in rows.iter_mut().filter(|r| r.price == price) {
                if row.order_id.as_deref() != Some(order_id) {
                    row.order_id = Some(order_id.to_string());
                    changed = true;
                }
            }
        }
        changed
    }

    // Persistence. One record per active ladder, keyed by a stable hash of
    // (exchange, symbol, identifier).

    pub fn store_rows(&mut self, store: &LadderStore) -> Result<()> {
        let identifier = self.identifier()?;
        let name = LadderStore::file_name(
            self.direction,
            &self.meta.exchange_symbol(),
            &identifier,
        );
        let rows = self.require_rows()?;
        store.save(&name, rows)?;
        self.file_save_name = Some(name);
        Ok(())
    }

    pub fn restore_rows(&mut self, store: &LadderStore, identifier: &str) -> Result<()> {
        let name = LadderStore::file_name(
            self.direction,
            &self.meta.exchange_symbol(),
            identifier,
        );
        let rows = store.load(&name)?;
        self.rows = Some(rows);
        self.file_save_name = Some(name);
        Ok(())
    }

    /// Delete the persisted record once the ladder is torn down.
    pub fn remove_stored(&mut self, store: &LadderStore) -> Result<()> {
        if let Some(name) = self.file_save_name.take() {
            store.remove(&name)?;
        }
        Ok(())
    }

    fn require_rows(&self) -> Result<&[LadderRung]> {
        self.rows
            .as_deref()
            .ok_or_else(|| BotError::Invariant("ladder not built".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_no_fees() -> InstrumentMeta {
        InstrumentMeta {
            exchange_id: "simex".to_string(),
            symbol: "ETH/USDT:USDT".to_string(),
            price_tick: 0.001,
            lot_step: 0.000001,
            contract_multiplier: 1.0,
            maker_fee: 0.0,
            taker_fee: 0.0,
        }
    }

    fn meta_with_fees() -> InstrumentMeta {
        InstrumentMeta {
            maker_fee: 0.0002,
            taker_fee: 0.0006,
            ..meta_no_fees()
        }
    }

    fn params() -> LadderParams {
        LadderParams {
            num_rungs: 4,
            price_dev: 0.005,
            save_scale: 2.0,
            base_to_save_mult: 1.0,
        }
    }

    fn built_long(meta: InstrumentMeta) -> LadderModel {
        let mut model = LadderModel::new(meta, Direction::Long, params()).unwrap();
        model
            .build(100.0, 10.0, 0.525, 50.0, 0.01, 0.75)
            .unwrap();
        model
    }

    #[test]
    fn test_rejects_too_few_rungs() {
        let p = LadderParams {
            num_rungs: 2,
            ..params()
        };
        assert!(LadderModel::new(meta_no_fees(), Direction::Long, p).is_err());
    }

    #[test]
    fn test_long_ladder_monotonicity() {
        let model = built_long(meta_no_fees());
        let rows = model.rows().unwrap();
        assert_eq!(rows.len(), 4);

        // prices strictly decrease away from the reference
        for pair in rows.windows(2) {
            assert!(pair[1].price < pair[0].price);
        }
        // rescue rung sizes strictly increase for save_scale > 1
        assert!(rows[2].size > rows[1].size);
        // stop row: zero size, flipped direction
        let stop = &rows[3];
        assert_eq!(stop.kind, OrderKind::Stop);
        assert_eq!(stop.size, 0.0);
        assert_eq!(stop.direction, Side::Sell);
        assert_eq!(stop.cum_size, rows[2].cum_size);
    }

    #[test]
    fn test_scenario_prices() {
        let model = built_long(meta_no_fees());
        let rows = model.rows().unwrap();

        assert_eq!(rows[0].price, 100.0);
        assert!((rows[1].price - 99.5).abs() < 1e-9);
        assert!((rows[2].price - 99.0025).abs() < 0.001);
        assert!((rows[3].price - 98.5075).abs() < 0.001);

        // average entry sits above the stop for a long ladder
        let (sl_price, sl_size) = model.stop_price_size().unwrap();
        assert!(rows[2].entry_price > sl_price);
        assert_eq!(sl_size, rows[2].cum_size);
        assert!(model.delta_factor() > 1.0);
    }

    #[test]
    fn test_risk_sizing_invariant() {
        // a full fill followed by the stop loses the risk budget
        let model = built_long(meta_no_fees());
        let rows = model.rows().unwrap();
        let stop = rows.last().unwrap();
        let loss = stop.realized_pnl.unwrap();
        assert!(
            (loss + 10.0).abs() < 0.1,
            "stop loss {loss} should be within rounding of -10"
        );
    }

    #[test]
    fn test_take_profit_tracks_fills() {
        let model = built_long(meta_with_fees());
        let rows = model.rows().unwrap();

        // only the base rung filled
        let (tp0, size0) = model.take_profit_price_size(rows[0].cum_size).unwrap();
        assert_eq!(tp0, rows[0].tp_price.unwrap());
        assert_eq!(size0, rows[0].cum_size);

        // rungs 0 and 1 filled: row 1's target, not row 0's
        let partial = rows[0].cum_size + rows[1].size * 0.5;
        let (tp1, _) = model.take_profit_price_size(partial).unwrap();
        assert_eq!(tp1, rows[1].tp_price.unwrap());
        assert_ne!(tp1, rows[0].tp_price.unwrap());

        // beyond the ladder: deepest rung's target
        let (tp_over, _) = model
            .take_profit_price_size(rows[2].cum_size * 10.0)
            .unwrap();
        assert_eq!(tp_over, rows[2].tp_price.unwrap());
    }

    #[test]
    fn test_reward_scales_with_next_rung_loss() {
        let model = built_long(meta_with_fees());
        let rows = model.rows().unwrap();
        // tp volume of row 0 exceeds its open volume by crv times the loss
        // the first rescue rung would represent
        let expected = rows[0].open_volume + rows[1].unrealized_pnl.abs() * 0.525;
        assert!((rows[0].tp_volume.unwrap() - expected).abs() < 1e-9);
        // long take-profit targets sit above the entry
        assert!(rows[0].tp_price.unwrap() > rows[0].entry_price);
    }

    #[test]
    fn test_short_ladder_mirrors() {
        let mut model =
            LadderModel::new(meta_with_fees(), Direction::Short, params()).unwrap();
        model
            .build(100.0, 10.0, 0.525, 50.0, 0.01, 0.75)
            .unwrap();
        let rows = model.rows().unwrap();

        for pair in rows.windows(2) {
            assert!(pair[1].price > pair[0].price);
        }
        let stop = rows.last().unwrap();
        assert_eq!(stop.direction, Side::Buy);
        // short loses when the price climbs to the stop
        assert!(stop.unrealized_pnl < 0.0);
        // short take-profit targets sit below the entry
        assert!(rows[0].tp_price.unwrap() < rows[0].entry_price);
    }

    #[test]
    fn test_degenerate_risk_rejected() {
        // a tick so coarse that the stop price rounds onto the average entry
        let meta = InstrumentMeta {
            price_tick: 1000.0,
            ..meta_no_fees()
        };
        let model = LadderModel::new(meta, Direction::Long, params()).unwrap();
        let err = model.base_size(100.0, 10.0);
        assert!(matches!(err, Err(BotError::DegenerateRisk(_))));
    }

    #[test]
    fn test_order_id_bookkeeping() {
        let mut model = built_long(meta_with_fees());
        let (sl_price, _) = model.stop_price_size().unwrap();
        assert!(model.identifier().is_err());

        assert!(model.update_stop_order_id_by_price(sl_price, "sl-1"));
        assert_eq!(model.identifier().unwrap(), "sl-1");
        // unchanged id reports no change
        assert!(!model.update_stop_order_id_by_price(sl_price, "sl-1"));

        let tp_price = model.rows().unwrap()[0].tp_price.unwrap();
        assert!(model.update_tp_order_id_by_price(tp_price, "tp-1"));
        let size = model.rows().unwrap()[0].cum_size;
        assert_eq!(model.latest_tp_order_id_by_size(size).unwrap(), "tp-1");
        assert!(model.row_by_tp_order_id("tp-1").is_some());
        assert!(model.row_by_order_id("sl-1").is_some());
    }

    #[test]
    fn test_max_drawdown() {
        let model = built_long(meta_no_fees());
        let dd = model.max_drawdown().unwrap();
        assert!((dd - (100.0 - 98.507) / 100.0).abs() < 0.001);
    }

    #[test]
    fn test_trailing_trigger_above_entry_for_long() {
        let model = built_long(meta_with_fees());
        let rows = model.rows().unwrap();
        let (trigger, trail) = model.trailing_trigger(rows[0].cum_size).unwrap();
        assert!(trigger > rows[0].entry_price);
        assert!(trail > 0.0);
    }
}
