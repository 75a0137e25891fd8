//! LadderBot - the position state machine.
//!
//! One synchronous tick loop per traded symbol: refresh the order book
//! cache, refresh the position, dispatch to the handler for the current
//! phase. Handlers reconcile desired orders against the observed book and
//! issue the minimal create/cancel operations to converge them. All aborted
//! actions are retried on the next tick; idempotent reconciliation is the
//! safety net against duplicated side effects.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bot::{PositionContext, TradePhase};
use crate::config::Config;
use crate::error::{BotError, Result};
use crate::exchange::{
    ExchangeGateway, InstrumentMeta, Order, OrderKind, OrderStatus, Position, Side,
};
use crate::model::{
    Direction, FixedTpslModel, LadderModel, LadderParams, LadderStore, OrderModel,
};
use crate::orderbook::OrderBookCache;
use crate::signal::{SignalHint, SignalSource};
use crate::trade_log::{self, TradeRecord};
use crate::trailing::TrailAction;

/// Which protective order a reconciliation call is maintaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectiveRole {
    StopLoss,
    TakeProfit,
}

impl ProtectiveRole {
    fn as_str(&self) -> &'static str {
        match self {
            ProtectiveRole::StopLoss => "stop loss",
            ProtectiveRole::TakeProfit => "take profit",
        }
    }
}

/// Explicit reconciliation result, checked by the caller instead of thrown.
#[derive(Debug)]
pub enum MaintainOutcome {
    /// The live order satisfying the intent (pre-existing or just placed).
    Maintained(Order),
    /// The position closed underneath us; nothing to maintain.
    NotInPosition,
    /// Cancel or placement failed; remembered state untouched, retry next tick.
    Failed,
}

/// Main application structure: the tick loop and its handlers.
pub struct LadderBot<G: ExchangeGateway> {
    gateway: Arc<G>,
    signal_source: Box<dyn SignalSource>,
    config: Config,
    meta: InstrumentMeta,
    store: LadderStore,
    long_model: OrderModel,
    short_model: OrderModel,
    cache: OrderBookCache,
    position: Position,
    ctx: PositionContext,
    shutdown: watch::Receiver<bool>,
}

impl<G: ExchangeGateway> LadderBot<G> {
    pub fn new(
        gateway: Arc<G>,
        signal_source: Box<dyn SignalSource>,
        config: Config,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let meta = gateway.meta(&config.symbol);
        let store = LadderStore::new(&config.data_dir)?;
        let long_model = Self::build_model(&config, &meta, Direction::Long)?;
        let short_model = Self::build_model(&config, &meta, Direction::Short)?;

        Ok(Self {
            gateway,
            signal_source,
            config,
            meta,
            store,
            long_model,
            short_model,
            cache: OrderBookCache::new(),
            position: Position::default(),
            ctx: PositionContext::new(),
            shutdown,
        })
    }

    fn build_model(
        config: &Config,
        meta: &InstrumentMeta,
        direction: Direction,
    ) -> Result<OrderModel> {
        match config.model_kind.as_str() {
            "fixed" => Ok(OrderModel::FixedTpsl(FixedTpslModel::new(
                meta.clone(),
                direction,
                config.tp_pct,
                config.sl_pct,
                config.trail_trigger_pct,
                config.trail_value_pct,
            ))),
            _ => Ok(OrderModel::Ladder(LadderModel::new(
                meta.clone(),
                direction,
                LadderParams {
                    num_rungs: config.num_rungs,
                    price_dev: config.price_dev,
                    save_scale: config.save_scale,
                    base_to_save_mult: config.base_to_save_mult,
                },
            )?)),
        }
    }

    pub fn cum_pnl(&self) -> f64 {
        self.ctx.cum_pnl
    }

    fn model(&self, direction: Direction) -> &OrderModel {
        match direction {
            Direction::Long => &self.long_model,
            Direction::Short => &self.short_model,
        }
    }

    fn model_mut(&mut self, direction: Direction) -> &mut OrderModel {
        match direction {
            Direction::Long => &mut self.long_model,
            Direction::Short => &mut self.short_model,
        }
    }

    /// The main loop. Returns when shutdown is requested or a fatal
    /// invariant violation is hit.
    pub async fn run(&mut self) -> Result<()> {
        self.preparation_handler().await;

        let mut next_refresh: i64 = 0;

        loop {
            // shutdown is observed only between ticks
            if *self.shutdown.borrow() {
                self.shutdown_handler().await;
                return Ok(());
            }

            let now_ms = Utc::now().timestamp_millis();
            match self.tick(now_ms, &mut next_refresh).await {
                Ok(()) => {}
                Err(err @ BotError::Invariant(_)) => {
                    error!(symbol = %self.config.symbol, %err, "fatal, stopping the loop");
                    return Err(err);
                }
                Err(err) => {
                    warn!(symbol = %self.config.symbol, %err, "tick aborted, retrying next tick");
                }
            }

            sleep(Duration::from_secs(self.config.tick_interval_secs)).await;
        }
    }

    /// One pass: cache refresh, position refresh, then handler dispatch.
    /// Handlers never observe a refresh from a different tick.
    async fn tick(&mut self, now_ms: i64, next_refresh: &mut i64) -> Result<()> {
        debug!(symbol = %self.config.symbol, phase = %self.ctx.phase(self.position.is_open), "tick start");

        self.refresh_active_orders().await?;
        self.refresh_open_position().await?;

        if !self.position.is_open {
            // entries are re-evaluated only after the debounce window
            if now_ms < *next_refresh {
                debug!(symbol = %self.config.symbol, "waiting for refresh");
                return Ok(());
            }
            *next_refresh = now_ms + self.config.refresh_timeout_secs as i64 * 1000;

            if self.ctx.last_was_open {
                self.finishtrade_handler().await;
                self.ctx.reset_after_trade();
            }

            self.housekeeping_handler().await;
            self.enter_position_handler().await;
        } else {
            *next_refresh = 0;

            self.exit_position_handler().await;
            self.in_position_handler().await?;

            self.ctx.record_open_tick(
                self.position.size,
                self.position.is_long,
                self.position.entry_price,
            );
        }

        debug!(symbol = %self.config.symbol, "tick end");
        Ok(())
    }

    async fn preparation_handler(&mut self) {
        debug!(symbol = %self.config.symbol, "prepare to run the main loop");
        match self
            .gateway
            .set_leverage(&self.config.symbol, self.config.leverage)
            .await
        {
            Ok(leverage) => info!(symbol = %self.config.symbol, leverage, "leverage set"),
            Err(err) => warn!(symbol = %self.config.symbol, %err, "could not set leverage"),
        }
    }

    /// Rebuild the order book cache from a single exchange query. On fetch
    /// failure the previous cache is left untouched and the tick aborts.
    async fn refresh_active_orders(&mut self) -> Result<()> {
        let open_orders = self.gateway.fetch_open_orders(&self.config.symbol).await?;
        let presence = self.cache.refresh(
            &open_orders,
            self.ctx.last_tp_order_id.as_deref(),
            self.ctx.last_sl_order_id.as_deref(),
        );

        // a remembered order that vanished was filled or cancelled by the
        // trader; stash the reference for finish-trade accounting
        if !presence.take_profit_found {
            if let Some(id) = self.ctx.last_tp_order_id.take() {
                debug!(symbol = %self.config.symbol, order_id = %id, "take-profit order no longer open");
                self.ctx.finished_tp_order_id = Some(id);
            }
        }
        if !presence.stop_found {
            if let Some(id) = self.ctx.last_sl_order_id.take() {
                debug!(symbol = %self.config.symbol, order_id = %id, "stop order no longer open");
                self.ctx.finished_sl_order_id = Some(id);
            }
        }

        Ok(())
    }

    async fn refresh_open_position(&mut self) -> Result<()> {
        let position = self.gateway.fetch_position(&self.config.symbol).await?;
        if position.is_open && position.is_long.is_none() {
            return Err(BotError::Invariant(format!(
                "open position of size {} has no direction",
                position.size
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Converge one protective order towards `(price, size)`.
    ///
    /// An exact price+size match in the cache is a no-op; anything else is
    /// cancel-then-replace. A failed take-profit cancel aborts the replace
    /// (never risk a duplicate close order); a failed stop cancel does not
    /// block the replacement (stop coverage must not lapse).
    async fn maintain_protective_order(
        &mut self,
        role: ProtectiveRole,
        price: f64,
        size: f64,
    ) -> Result<MaintainOutcome> {
        // protective orders target the live position; an earlier handler in
        // this tick may have changed it through a filled order
        let position = self.gateway.fetch_position(&self.config.symbol).await?;
        if !position.is_open {
            debug!(symbol = %self.config.symbol, "not in a position, nothing to maintain");
            return Ok(MaintainOutcome::NotInPosition);
        }
        let is_long = position.is_long.ok_or_else(|| {
            BotError::Invariant(format!(
                "open position of size {} has no direction",
                position.size
            ))
        })?;
        self.position = position;

        let close_side = if is_long { Side::Sell } else { Side::Buy };
        let price = self.meta.price_to_precision(price);
        let size = self.meta.amount_to_precision(size);

        let existing = match role {
            ProtectiveRole::StopLoss => self.cache.matching_stop_order(close_side, price, size),
            ProtectiveRole::TakeProfit => self.cache.matching_limit_order(close_side, price, size),
        };
        if let Some(order) = existing {
            debug!(
                symbol = %self.config.symbol,
                side = %close_side,
                price,
                "matching {} order already exists",
                role.as_str()
            );
            let order = order.clone();
            self.remember_order(role, &order.id);
            return Ok(MaintainOutcome::Maintained(order));
        }

        // cancel the outdated order for this role first
        let remembered = match role {
            ProtectiveRole::StopLoss => self.ctx.last_sl_order_id.clone(),
            ProtectiveRole::TakeProfit => self.ctx.last_tp_order_id.clone(),
        };
        if let Some(order_id) = remembered {
            let kind = match role {
                ProtectiveRole::StopLoss => OrderKind::Stop,
                ProtectiveRole::TakeProfit => OrderKind::Limit,
            };
            if self.cache.has_order(kind, close_side, &order_id) {
                info!(
                    symbol = %self.config.symbol,
                    order_id = %order_id,
                    "cancelling existing {} {} order, price or size differs from {} at {}",
                    close_side, role.as_str(), size, price
                );
                if let Err(err) = self.gateway.cancel_order(&order_id, &self.config.symbol).await {
                    match role {
                        ProtectiveRole::TakeProfit => {
                            warn!(
                                symbol = %self.config.symbol,
                                order_id = %order_id,
                                %err,
                                "could not cancel take-profit order, aborting replacement"
                            );
                            return Ok(MaintainOutcome::Failed);
                        }
                        ProtectiveRole::StopLoss => {
                            warn!(
                                symbol = %self.config.symbol,
                                order_id = %order_id,
                                %err,
                                "could not cancel stop order, placing replacement anyway"
                            );
                        }
                    }
                }
            }
        }

        info!(
            symbol = %self.config.symbol,
            "create {} {} order of size {} at {}",
            close_side, role.as_str(), size, price
        );
        let placed = match role {
            ProtectiveRole::StopLoss => {
                self.gateway
                    .create_stop_order(&self.config.symbol, close_side, price, size)
                    .await
            }
            ProtectiveRole::TakeProfit => {
                self.gateway
                    .create_limit_order(&self.config.symbol, close_side, size, price, true)
                    .await
            }
        };
        match placed {
            Ok(order) => {
                info!(
                    symbol = %self.config.symbol,
                    order_id = %order.id,
                    "{} {} order of size {} at {} created",
                    close_side, role.as_str(), size, price
                );
                self.remember_order(role, &order.id);
                Ok(MaintainOutcome::Maintained(order))
            }
            Err(err) => {
                warn!(
                    symbol = %self.config.symbol,
                    %err,
                    "could not place {} order, retrying next tick",
                    role.as_str()
                );
                Ok(MaintainOutcome::Failed)
            }
        }
    }

    fn remember_order(&mut self, role: ProtectiveRole, order_id: &str) {
        match role {
            ProtectiveRole::StopLoss => self.ctx.last_sl_order_id = Some(order_id.to_string()),
            ProtectiveRole::TakeProfit => self.ctx.last_tp_order_id = Some(order_id.to_string()),
        }
    }

    /// Flat-state cleanup: cancel resting model orders from previous trades
    /// and drop their persisted records.
    async fn housekeeping_handler(&mut self) {
        debug!(symbol = %self.config.symbol, "not in a position, cleaning up previous orders and records");

        let mut cancelled_any = false;
        for direction in [Direction::Long, Direction::Short] {
            cancelled_any |= self.cancel_model_orders(direction).await;
        }
        cancelled_any |= self.cancel_entry_order(Side::Buy).await;
        cancelled_any |= self.cancel_entry_order(Side::Sell).await;

        if cancelled_any && self.config.settle_delay_ms > 0 {
            // let the exchange converge before new orders go out
            sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        }
    }

    /// Cancel every still-open order recorded in a ladder. Rows and the
    /// persisted record are dropped only when every cancel went through,
    /// otherwise the next housekeeping pass retries.
    async fn cancel_model_orders(&mut self, direction: Direction) -> bool {
        let targets: Vec<(String, OrderKind, Side)> = {
            let Some(ladder) = self.model(direction).as_ladder() else {
                return false;
            };
            let Some(rows) = ladder.rows() else {
                return false;
            };
            rows.iter()
                .filter_map(|row| {
                    let id = row.order_id.as_deref()?;
                    self.cache
                        .has_order(row.kind, row.direction, id)
                        .then(|| (id.to_string(), row.kind, row.direction))
                })
                .collect()
        };

        if !targets.is_empty() {
            info!(
                symbol = %self.config.symbol,
                %direction,
                count = targets.len(),
                "cancelling resting ladder orders"
            );
        }

        let mut all_ok = true;
        let mut cancelled = false;
        for (order_id, kind, side) in &targets {
            match self.gateway.cancel_order(order_id, &self.config.symbol).await {
                Ok(()) => cancelled = true,
                Err(err) => {
                    warn!(
                        symbol = %self.config.symbol,
                        order_id = %order_id,
                        %err,
                        "could not cancel {} {:?} order",
                        side, kind
                    );
                    all_ok = false;
                }
            }
        }

        if all_ok {
            let store = self.store.clone();
            let symbol = self.config.symbol.clone();
            if let Some(ladder) = self.model_mut(direction).as_ladder_mut() {
                if ladder.is_built() {
                    if let Err(err) = ladder.remove_stored(&store) {
                        warn!(symbol = %symbol, %err, "could not remove ladder record");
                    }
                    ladder.clear();
                }
            }
        }

        cancelled
    }

    /// Cancel the fixed-model resting entry order on `side`, if any.
    async fn cancel_entry_order(&mut self, side: Side) -> bool {
        let slot = match side {
            Side::Buy => self.ctx.current_buy_order_id.clone(),
            Side::Sell => self.ctx.current_sell_order_id.clone(),
        };
        let Some(order_id) = slot else {
            return false;
        };

        if !self.cache.has_order(OrderKind::Limit, side, &order_id) {
            // filled or cancelled externally: the reference is stale
            debug!(symbol = %self.config.symbol, order_id = %order_id, "entry order no longer open, clearing reference");
            self.clear_entry_slot(side);
            return false;
        }

        info!(symbol = %self.config.symbol, order_id = %order_id, "cancel current {} entry order", side);
        match self.gateway.cancel_order(&order_id, &self.config.symbol).await {
            Ok(()) => {
                info!(symbol = %self.config.symbol, order_id = %order_id, "entry order cancelled");
                self.clear_entry_slot(side);
                true
            }
            Err(err) => {
                warn!(symbol = %self.config.symbol, order_id = %order_id, %err, "could not cancel entry order");
                false
            }
        }
    }

    fn clear_entry_slot(&mut self, side: Side) {
        match side {
            Side::Buy => self.ctx.current_buy_order_id = None,
            Side::Sell => self.ctx.current_sell_order_id = None,
        }
    }

    /// Flat-state entry evaluation: risk budget, signal, model build, order
    /// placement.
    async fn enter_position_handler(&mut self) {
        info!(symbol = %self.config.symbol, "not in a position, waiting for entry signals and new order checks");

        let total_balance = match self.gateway.total_balance().await {
            Ok(balance) => balance,
            Err(err) => {
                warn!(symbol = %self.config.symbol, %err, "could not check current balance");
                return;
            }
        };
        let risk_per_trade = total_balance * self.config.max_account_risk_per_trade;
        info!(
            symbol = %self.config.symbol,
            total_balance,
            risk_per_trade,
            "risk budget for this trade"
        );

        let (ask, bid) = match self.gateway.ask_bid(&self.config.symbol).await {
            Ok(quotes) => quotes,
            Err(err) => {
                warn!(symbol = %self.config.symbol, %err, "could not get bid/ask price");
                return;
            }
        };
        let signal = match self.signal_source.signal(ask, bid).await {
            Ok(signal) => signal,
            Err(err) => {
                warn!(symbol = %self.config.symbol, %err, "could not evaluate entry signal");
                return;
            }
        };
        if signal.is_empty() {
            debug!(symbol = %self.config.symbol, "no entry signal");
            return;
        }

        if let Some(hint) = signal.sell {
            self.enter_direction(Direction::Short, hint, ask, risk_per_trade)
                .await;
        }
        if let Some(hint) = signal.buy {
            self.enter_direction(Direction::Long, hint, bid, risk_per_trade)
                .await;
        }
    }

    async fn enter_direction(
        &mut self,
        direction: Direction,
        hint: SignalHint,
        fallback_price: f64,
        risk_per_trade: f64,
    ) {
        let price = self.meta.price_to_precision(hint.entry_price(fallback_price));
        debug!(
            symbol = %self.config.symbol,
            phase = %TradePhase::Entering,
            %direction,
            price,
            "evaluating entry"
        );
        if self.model(direction).capabilities().generates_entry_ladder {
            self.enter_ladder(direction, price, risk_per_trade).await;
        } else {
            self.enter_fixed(direction, price, risk_per_trade).await;
        }
    }

    /// Build the ladder for the given risk budget and place every row:
    /// the entry rungs as resting limits and the stop row as a trigger-price
    /// stop covering the full ladder size.
    async fn enter_ladder(&mut self, direction: Direction, price: f64, risk_per_trade: f64) {
        let crv = self.config.reward_risk_ratio;
        let leverage = self.config.leverage;
        let min_roe = self.config.min_roe;
        let trigger_distance = self.config.min_roe_trigger_distance;
        let not_trading = self.config.not_trading;

        let planned: Vec<(usize, OrderKind, Side, f64, f64, f64)> = {
            let Some(ladder) = self.model_mut(direction).as_ladder_mut() else {
                return;
            };
            if let Err(err) =
                ladder.build(price, risk_per_trade, crv, leverage, min_roe, trigger_distance)
            {
                warn!(symbol = %self.config.symbol, %direction, %err, "entry attempt aborted");
                return;
            }
            ladder
                .rows()
                .unwrap_or_default()
                .iter()
                .map(|r| (r.index, r.kind, r.direction, r.price, r.size, r.cum_size))
                .collect()
        };

        if not_trading {
            info!(symbol = %self.config.symbol, %direction, "not trading: ladder computed, no orders placed");
            for (index, kind, side, row_price, row_size, row_cum) in &planned {
                debug!(
                    index,
                    ?kind,
                    %side,
                    price = row_price,
                    size = row_size,
                    cum_size = row_cum,
                    "simulated ladder row"
                );
            }
            return;
        }

        let mut placed: Vec<(usize, String)> = Vec::new();
        let mut failed = false;
        for (index, kind, side, row_price, row_size, row_cum) in planned {
            let result = match kind {
                OrderKind::Limit if row_size > 0.0 => self
                    .gateway
                    .create_limit_order(&self.config.symbol, side, row_size, row_price, false)
                    .await
                    .map(Some),
                OrderKind::Stop => self
                    .gateway
                    .create_stop_order(&self.config.symbol, side, row_price, row_cum)
                    .await
                    .map(Some),
                _ => Ok(None),
            };
            match result {
                Ok(Some(order)) => placed.push((index, order.id)),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        symbol = %self.config.symbol,
                        index,
                        price = row_price,
                        %err,
                        "could not create ladder order"
                    );
                    failed = true;
                }
            }
        }

        let store = self.store.clone();
        if let Some(ladder) = self.model_mut(direction).as_ladder_mut() {
            for (index, order_id) in &placed {
                ladder.set_order_id(*index, order_id);
            }
            if let Err(err) = ladder.store_rows(&store) {
                warn!(symbol = %self.config.symbol, %err, "could not persist ladder record");
            }
        }

        if failed {
            warn!(symbol = %self.config.symbol, %direction, "some ladder orders were not placed, housekeeping will clean up");
        } else {
            info!(symbol = %self.config.symbol, %direction, orders = placed.len(), "ladder orders placed");
        }
    }

    /// Place the single risk-sized entry order of the fixed TP/SL model.
    async fn enter_fixed(&mut self, direction: Direction, price: f64, risk_per_trade: f64) {
        let (size, tp_preview, sl_preview) = {
            let OrderModel::FixedTpsl(model) = self.model(direction) else {
                return;
            };
            let size = match model.order_size(price, risk_per_trade) {
                Ok(size) => size,
                Err(err) => {
                    warn!(symbol = %self.config.symbol, %direction, %err, "entry attempt aborted");
                    return;
                }
            };
            (
                size,
                model.take_profit_price_size(size, price).0,
                model.stop_price_size(size, price).0,
            )
        };

        if self.config.not_trading {
            info!(
                symbol = %self.config.symbol,
                "not trading: {} order of size {} at {} would be created with stop at {} and take profit at {}",
                direction, size, price, sl_preview, tp_preview
            );
            return;
        }

        let side = direction.entry_side();
        info!(
            symbol = %self.config.symbol,
            "create {} entry order of size {} at {} with fixed stop at {} and take profit at {}",
            side, size, price, sl_preview, tp_preview
        );
        match self
            .gateway
            .create_limit_order(&self.config.symbol, side, size, price, false)
            .await
        {
            Ok(order) => {
                info!(symbol = %self.config.symbol, order_id = %order.id, "entry order placed");
                match side {
                    Side::Buy => self.ctx.current_buy_order_id = Some(order.id),
                    Side::Sell => self.ctx.current_sell_order_id = Some(order.id),
                }
            }
            Err(err) => {
                warn!(symbol = %self.config.symbol, %err, "could not execute the {} entry order", side);
            }
        }
    }

    /// Restore persisted ladders after a restart by matching currently open
    /// stop orders. Returns (long restored, short restored).
    fn restore_models(&mut self) -> (bool, bool) {
        let mut restored = (false, false);
        let anchors = [
            (Direction::Long, self.cache.long_stops.first().map(|o| o.id.clone())),
            (Direction::Short, self.cache.short_stops.first().map(|o| o.id.clone())),
        ];

        for (direction, anchor) in anchors {
            let needs_restore = self
                .model(direction)
                .as_ladder()
                .map_or(false, |l| !l.is_built());
            if !needs_restore {
                continue;
            }
            let Some(order_id) = anchor else {
                continue;
            };

            info!(
                symbol = %self.config.symbol,
                %direction,
                order_id = %order_id,
                "open stop order found, restoring ladder record"
            );
            let store = self.store.clone();
            let result = match self.model_mut(direction).as_ladder_mut() {
                Some(ladder) => ladder.restore_rows(&store, &order_id),
                None => continue,
            };
            match result {
                Ok(()) => match direction {
                    Direction::Long => restored.0 = true,
                    Direction::Short => restored.1 = true,
                },
                Err(BotError::ModelNotFound(_)) => {
                    warn!(
                        symbol = %self.config.symbol,
                        order_id = %order_id,
                        "no persisted ladder matches the stop order, proceeding fresh"
                    );
                }
                Err(err) => {
                    warn!(symbol = %self.config.symbol, %err, "could not restore ladder record");
                }
            }
        }

        restored
    }

    /// In-position maintenance: restore, enforce single-direction exposure,
    /// keep the stop-loss and take-profit converged with the live position.
    async fn in_position_handler(&mut self) -> Result<()> {
        let is_long = self.position.is_long.ok_or_else(|| {
            BotError::Invariant("open position has no direction".to_string())
        })?;
        let direction = if is_long { Direction::Long } else { Direction::Short };

        debug!(
            symbol = %self.config.symbol,
            size = self.position.size,
            %direction,
            entry_price = self.position.entry_price,
            leverage = self.position.leverage,
            "in position"
        );

        let (restored_long, restored_short) = self.restore_models();

        // single-direction exposure: this is not a grid strategy, the
        // opposite side's resting orders are cancelled
        let opposite = match direction {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        };
        if self
            .model(opposite)
            .as_ladder()
            .map_or(false, |l| l.is_built())
        {
            info!(
                symbol = %self.config.symbol,
                "entered a {} position, cleaning up opposite orders",
                direction
            );
            self.cancel_model_orders(opposite).await;
        }
        self.cancel_entry_order(opposite.entry_side()).await;

        // after a restore the remembered ids come from the record, not from
        // this process's lifetime
        let restored_current = match direction {
            Direction::Long => restored_long,
            Direction::Short => restored_short,
        };
        if restored_current {
            let (sl_id, tp_id) = match self.model(direction).as_ladder() {
                Some(ladder) => (
                    ladder.identifier().ok(),
                    ladder.latest_tp_order_id_by_size(self.position.size),
                ),
                None => (None, None),
            };
            self.ctx.last_sl_order_id = sl_id;
            self.ctx.last_tp_order_id = tp_id;
        }

        // maintain the stop loss
        let (sl_price, sl_size) = match self
            .model(direction)
            .stop_price_size(self.position.size, self.position.entry_price)
        {
            Ok(level) => level,
            Err(err) => {
                warn!(symbol = %self.config.symbol, %err, "no stop level available");
                return Ok(());
            }
        };
        let prev_sl_id = self.ctx.last_sl_order_id.clone();
        let sl_outcome = self
            .maintain_protective_order(ProtectiveRole::StopLoss, sl_price, sl_size)
            .await?;
        if matches!(sl_outcome, MaintainOutcome::NotInPosition) {
            return Ok(());
        }

        // maintain the take profit, sized for what has actually filled
        let (tp_price, tp_size) = match self
            .model(direction)
            .take_profit_price_size(self.position.size, self.position.entry_price)
        {
            Ok(level) => level,
            Err(err) => {
                warn!(symbol = %self.config.symbol, %err, "no take-profit level available");
                return Ok(());
            }
        };
        let prev_tp_id = self.ctx.last_tp_order_id.clone();
        let tp_outcome = self
            .maintain_protective_order(ProtectiveRole::TakeProfit, tp_price, tp_size)
            .await?;

        // record fresh order ids in the ladder and persist the change
        let mut model_changed = false;
        if let MaintainOutcome::Maintained(order) = &sl_outcome {
            if prev_sl_id.as_deref() != Some(order.id.as_str()) {
                if let Some(ladder) = self.model_mut(direction).as_ladder_mut() {
                    model_changed |= ladder.update_stop_order_id_by_price(sl_price, &order.id);
                }
            }
        }
        if let MaintainOutcome::Maintained(order) = &tp_outcome {
            if prev_tp_id.as_deref() != Some(order.id.as_str()) {
                if let Some(ladder) = self.model_mut(direction).as_ladder_mut() {
                    model_changed |= ladder.update_tp_order_id_by_price(tp_price, &order.id);
                }
            }
        }
        if model_changed {
            let store = self.store.clone();
            if let Some(ladder) = self.model_mut(direction).as_ladder_mut() {
                if let Err(err) = ladder.store_rows(&store) {
                    warn!(symbol = %self.config.symbol, %err, "could not persist ladder record");
                }
            }
        }

        if self.position.size != self.ctx.last_size {
            info!(
                symbol = %self.config.symbol,
                "in a {} position at {} with size {}, take profit at {} and stop loss at {}",
                direction, self.position.entry_price, self.position.size, tp_price, sl_price
            );
        }

        Ok(())
    }

    /// Exit evaluation: an explicit opposite-direction signal closes at the
    /// touch; otherwise the trailing stop controller ratchets a floor under
    /// the profit and closes when it is crossed back.
    async fn exit_position_handler(&mut self) {
        let Some(is_long) = self.position.is_long else {
            return;
        };
        let direction = if is_long { Direction::Long } else { Direction::Short };

        let (ask, bid) = match self.gateway.ask_bid(&self.config.symbol).await {
            Ok(quotes) => quotes,
            Err(err) => {
                warn!(symbol = %self.config.symbol, %err, "could not get bid/ask for exit evaluation");
                return;
            }
        };
        let signal = match self.signal_source.exit_signal(ask, bid).await {
            Ok(signal) => signal,
            Err(err) => {
                warn!(symbol = %self.config.symbol, %err, "could not evaluate exit signal");
                return;
            }
        };

        let mut exit_signalled = false;
        if is_long && signal.sell_only() {
            debug!(symbol = %self.config.symbol, "long exit signal");
            if let Err(err) = self
                .maintain_protective_order(ProtectiveRole::TakeProfit, ask, self.position.size)
                .await
            {
                warn!(symbol = %self.config.symbol, %err, "could not place exit order");
            }
            exit_signalled = true;
            self.ctx.exiting = true;
        } else if !is_long && signal.buy_only() {
            debug!(symbol = %self.config.symbol, "short exit signal");
            if let Err(err) = self
                .maintain_protective_order(ProtectiveRole::TakeProfit, bid, self.position.size)
                .await
            {
                warn!(symbol = %self.config.symbol, %err, "could not place exit order");
            }
            exit_signalled = true;
            self.ctx.exiting = true;
        }

        if !exit_signalled {
            let trigger = self
                .model(direction)
                .trailing_trigger(self.position.size, self.position.entry_price);
            if let Some((trigger_price, trail_value)) = trigger {
                let ask_q = self.meta.price_to_precision(ask);
                let bid_q = self.meta.price_to_precision(bid);
                debug!(
                    symbol = %self.config.symbol,
                    trigger_price,
                    trail_value,
                    "trailing stop evaluation"
                );
                let action = self
                    .ctx
                    .trailing
                    .update(direction, trigger_price, trail_value, ask_q, bid_q);
                if action == TrailAction::ExitNow {
                    let exit_price = if is_long { ask_q } else { bid_q };
                    info!(
                        symbol = %self.config.symbol,
                        exit_price,
                        "trailing stop hit, taking profit now"
                    );
                    if let Err(err) = self
                        .maintain_protective_order(
                            ProtectiveRole::TakeProfit,
                            exit_price,
                            self.position.size,
                        )
                        .await
                    {
                        warn!(symbol = %self.config.symbol, %err, "could not place exit order");
                    }
                    self.ctx.exiting = true;
                }
            }
        }

        if self.ctx.exiting {
            info!(
                symbol = %self.config.symbol,
                "exiting the {} position at {} with size {}",
                direction, self.position.entry_price, self.position.size
            );
        }
    }

    /// First flat tick after having been in a position: look up the realized
    /// pnl of whichever protective order closed the trade and append it to
    /// the trade history.
    async fn finishtrade_handler(&mut self) {
        info!(
            symbol = %self.config.symbol,
            size = self.ctx.last_size,
            long = ?self.ctx.last_was_long,
            "finish trade accounting"
        );

        let direction = match self.ctx.last_was_long {
            Some(true) => Direction::Long,
            Some(false) => Direction::Short,
            None => {
                warn!(symbol = %self.config.symbol, "previous position direction unknown, skipping pnl accounting");
                return;
            }
        };

        let tp_id = self
            .ctx
            .finished_tp_order_id
            .clone()
            .or_else(|| self.ctx.last_tp_order_id.clone());
        let sl_id = self
            .ctx
            .finished_sl_order_id
            .clone()
            .or_else(|| self.ctx.last_sl_order_id.clone());

        let tp_order = match &tp_id {
            Some(id) => match self.gateway.fetch_order(&self.config.symbol, id).await {
                Ok(order) => Some(order),
                Err(err) => {
                    warn!(symbol = %self.config.symbol, order_id = %id, %err, "cannot fetch take-profit order");
                    None
                }
            },
            None => None,
        };
        let sl_order = match &sl_id {
            Some(id) => match self.gateway.fetch_order(&self.config.symbol, id).await {
                Ok(order) => Some(order),
                Err(err) => {
                    warn!(symbol = %self.config.symbol, order_id = %id, %err, "cannot fetch stop order");
                    None
                }
            },
            None => None,
        };

        let mut realized_pnl = 0.0;
        let mut entry_price = self.ctx.last_entry_price;
        let mut exit_kind = "unknown";

        if tp_order.as_ref().map_or(false, |o| o.status == OrderStatus::Closed) {
            info!(symbol = %self.config.symbol, "take profit order got executed");
            exit_kind = "take_profit";
            if let (Some(id), Some(ladder)) = (&tp_id, self.model(direction).as_ladder()) {
                match ladder.row_by_tp_order_id(id) {
                    Some(row) => {
                        realized_pnl = row.realized_pnl.unwrap_or(0.0);
                        entry_price = row.entry_price;
                    }
                    None => {
                        warn!(symbol = %self.config.symbol, order_id = %id, "no ladder row matches the take-profit order");
                    }
                }
            }
        } else if sl_order.as_ref().map_or(false, |o| o.status == OrderStatus::Closed) {
            info!(symbol = %self.config.symbol, "stop loss order got executed");
            exit_kind = "stop_loss";
            if let (Some(id), Some(ladder)) = (&sl_id, self.model(direction).as_ladder()) {
                match ladder.row_by_order_id(id) {
                    Some(row) => {
                        realized_pnl = row.realized_pnl.unwrap_or(0.0);
                        entry_price = row.entry_price;
                    }
                    None => {
                        warn!(symbol = %self.config.symbol, order_id = %id, "no ladder row matches the stop order");
                    }
                }
            }
        } else {
            warn!(symbol = %self.config.symbol, "position closed without a filled protective order on record");
        }

        self.ctx.cum_pnl += realized_pnl;
        let outcome = if realized_pnl > 0.0 { "profit" } else { "loss" };
        crate::tprintln!(
            "{} {} closed {} {} of last trade {:.4}, cumulative pnl {:.4}",
            "[TRADE]".green().bold(),
            self.config.symbol,
            direction,
            outcome,
            realized_pnl,
            self.ctx.cum_pnl
        );

        let record = TradeRecord::new(
            Utc::now(),
            self.meta.exchange_id.clone(),
            self.config.symbol.clone(),
            direction,
            self.ctx.last_size,
            entry_price,
            exit_kind,
            realized_pnl,
            self.ctx.cum_pnl,
        );
        if let Err(err) = trade_log::log_trade(&self.config.trade_log_file, &record) {
            warn!(symbol = %self.config.symbol, %err, "failed to append trade history");
        }
    }

    /// Cooperative shutdown: one final housekeeping pass when flat, then
    /// stop. No new orders after shutdown begins.
    async fn shutdown_handler(&mut self) {
        info!(symbol = %self.config.symbol, phase = %TradePhase::Shutdown, "shutdown requested, finishing up");
        if !self.position.is_open {
            self.housekeeping_handler().await;
        } else {
            info!(symbol = %self.config.symbol, "position still open, protective orders stay in place");
        }
        crate::tprintln!(
            "{} {} stopped, cumulative pnl {:.4}",
            "[SHUTDOWN]".cyan().bold(),
            self.config.symbol,
            self.ctx.cum_pnl
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimGateway;
    use crate::signal::IdleSignalSource;
    use std::path::Path;

    fn test_meta() -> InstrumentMeta {
        InstrumentMeta {
            exchange_id: "simex".to_string(),
            symbol: "ETH/USDT:USDT".to_string(),
            price_tick: 0.001,
            lot_step: 0.000001,
            contract_multiplier: 1.0,
            maker_fee: 0.0002,
            taker_fee: 0.0006,
        }
    }

    fn test_config(dir: &Path) -> Config {
        Config {
            symbol: "ETH/USDT:USDT".to_string(),
            data_dir: dir.join("ladders").to_string_lossy().into_owned(),
            trade_log_file: dir.join("trades.csv").to_string_lossy().into_owned(),
            settle_delay_ms: 0,
            ..Config::default()
        }
    }

    fn make_bot(
        gateway: Arc<SimGateway>,
        dir: &Path,
    ) -> (LadderBot<SimGateway>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let bot = LadderBot::new(
            gateway,
            Box::new(IdleSignalSource),
            test_config(dir),
            rx,
        )
        .unwrap();
        (bot, tx)
    }

    fn make_gateway() -> Arc<SimGateway> {
        let gw = Arc::new(SimGateway::new(test_meta(), 10_000.0));
        gw.set_quotes(100.01, 99.99);
        gw
    }

    #[tokio::test]
    async fn test_maintain_protective_order_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let gw = make_gateway();
        gw.open_position(2.0, true, 100.0, 50.0);
        let (mut bot, _tx) = make_bot(gw.clone(), tmp.path());

        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();

        let first = bot
            .maintain_protective_order(ProtectiveRole::StopLoss, 98.5, 2.0)
            .await
            .unwrap();
        let MaintainOutcome::Maintained(order) = first else {
            panic!("expected a placed order");
        };
        assert_eq!(gw.open_order_count(), 1);

        // identical intent against a refreshed book: no second order
        bot.refresh_active_orders().await.unwrap();
        let second = bot
            .maintain_protective_order(ProtectiveRole::StopLoss, 98.5, 2.0)
            .await
            .unwrap();
        let MaintainOutcome::Maintained(same) = second else {
            panic!("expected the existing order");
        };
        assert_eq!(same.id, order.id);
        assert_eq!(gw.open_order_count(), 1);
    }

    #[tokio::test]
    async fn test_maintain_replaces_on_price_change() {
        let tmp = tempfile::tempdir().unwrap();
        let gw = make_gateway();
        gw.open_position(2.0, true, 100.0, 50.0);
        let (mut bot, _tx) = make_bot(gw.clone(), tmp.path());

        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();

        let first = bot
            .maintain_protective_order(ProtectiveRole::StopLoss, 98.5, 2.0)
            .await
            .unwrap();
        let MaintainOutcome::Maintained(old) = first else {
            panic!("expected a placed order");
        };

        bot.refresh_active_orders().await.unwrap();
        let second = bot
            .maintain_protective_order(ProtectiveRole::StopLoss, 98.4, 2.0)
            .await
            .unwrap();
        let MaintainOutcome::Maintained(new) = second else {
            panic!("expected a replacement order");
        };
        assert_ne!(new.id, old.id);
        // the outdated stop was cancelled, exactly one remains
        assert_eq!(gw.open_order_count(), 1);
    }

    #[tokio::test]
    async fn test_maintain_reports_not_in_position() {
        let tmp = tempfile::tempdir().unwrap();
        let gw = make_gateway();
        let (mut bot, _tx) = make_bot(gw.clone(), tmp.path());

        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();

        let outcome = bot
            .maintain_protective_order(ProtectiveRole::StopLoss, 98.5, 2.0)
            .await
            .unwrap();
        assert!(matches!(outcome, MaintainOutcome::NotInPosition));
        assert_eq!(gw.open_order_count(), 0);
    }

    #[tokio::test]
    async fn test_ladder_entry_then_housekeeping() {
        let tmp = tempfile::tempdir().unwrap();
        let gw = make_gateway();
        let (mut bot, _tx) = make_bot(gw.clone(), tmp.path());

        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();

        bot.enter_direction(Direction::Long, SignalHint::default(), 100.0, 10.0)
            .await;

        // three entry rungs plus the stop row
        assert_eq!(gw.open_order_count(), 4);
        let ladder = bot.long_model.as_ladder().unwrap();
        assert!(ladder.is_built());
        let identifier = ladder.identifier().unwrap();
        let file = LadderStore::file_name(
            Direction::Long,
            &bot.meta.exchange_symbol(),
            &identifier,
        );
        assert!(bot.store.dir().join(&file).exists());

        bot.refresh_active_orders().await.unwrap();
        bot.housekeeping_handler().await;

        assert_eq!(gw.open_order_count(), 0);
        assert!(!bot.long_model.as_ladder().unwrap().is_built());
        assert!(!bot.store.dir().join(&file).exists());
    }

    #[tokio::test]
    async fn test_ladder_restores_after_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let gw = make_gateway();
        let (mut bot, _tx) = make_bot(gw.clone(), tmp.path());

        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();
        bot.enter_direction(Direction::Long, SignalHint::default(), 100.0, 10.0)
            .await;
        let identifier = bot.long_model.as_ladder().unwrap().identifier().unwrap();
        let base_size = bot.long_model.as_ladder().unwrap().rows().unwrap()[0].cum_size;

        // process restart: a fresh bot over the same gateway and data dir
        let (mut bot2, _tx2) = make_bot(gw.clone(), tmp.path());
        gw.open_position(base_size, true, 100.0, 50.0);

        bot2.refresh_active_orders().await.unwrap();
        bot2.refresh_open_position().await.unwrap();
        bot2.in_position_handler().await.unwrap();

        let ladder = bot2.long_model.as_ladder().unwrap();
        assert!(ladder.is_built());
        assert_eq!(bot2.ctx.last_sl_order_id.as_deref(), Some(identifier.as_str()));
        // the restored ladder's take-profit is now being maintained
        assert!(bot2.ctx.last_tp_order_id.is_some());
    }

    #[tokio::test]
    async fn test_finish_trade_accounts_realized_pnl() {
        let tmp = tempfile::tempdir().unwrap();
        let gw = make_gateway();
        let (mut bot, _tx) = make_bot(gw.clone(), tmp.path());

        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();
        bot.enter_direction(Direction::Long, SignalHint::default(), 100.0, 10.0)
            .await;

        let base_size = bot.long_model.as_ladder().unwrap().rows().unwrap()[0].cum_size;
        gw.open_position(base_size, true, 100.0, 50.0);
        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();
        bot.in_position_handler().await.unwrap();
        bot.ctx
            .record_open_tick(base_size, Some(true), bot.position.entry_price);

        let tp_id = bot.ctx.last_tp_order_id.clone().unwrap();
        let expected = bot
            .long_model
            .as_ladder()
            .unwrap()
            .row_by_tp_order_id(&tp_id)
            .unwrap()
            .realized_pnl
            .unwrap();

        // the take-profit fills and the position closes
        gw.mark_order_closed(&tp_id);
        gw.close_position();
        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();

        bot.finishtrade_handler().await;

        assert!((bot.ctx.cum_pnl - expected).abs() < 1e-9);
        assert!(std::path::Path::new(&bot.config.trade_log_file).exists());
    }

    #[tokio::test]
    async fn test_opposite_ladder_cancelled_once_in_position() {
        let tmp = tempfile::tempdir().unwrap();
        let gw = make_gateway();
        let (mut bot, _tx) = make_bot(gw.clone(), tmp.path());

        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();

        // a both-directions signal leaves two resting ladders
        bot.enter_direction(Direction::Short, SignalHint::default(), 100.01, 10.0)
            .await;
        bot.enter_direction(Direction::Long, SignalHint::default(), 99.99, 10.0)
            .await;
        assert_eq!(gw.open_order_count(), 8);

        // the long side fills first: single-direction exposure kicks in
        let base_size = bot.long_model.as_ladder().unwrap().rows().unwrap()[0].cum_size;
        gw.open_position(base_size, true, 99.99, 50.0);
        bot.refresh_active_orders().await.unwrap();
        bot.refresh_open_position().await.unwrap();
        bot.in_position_handler().await.unwrap();

        assert!(!bot.short_model.as_ladder().unwrap().is_built());
        // long ladder rows (3 limits + stop) plus the fresh take-profit
        assert_eq!(gw.open_order_count(), 5);
    }
}
