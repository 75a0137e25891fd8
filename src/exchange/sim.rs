//! In-memory simulated exchange.
//!
//! Backs the paper-trading mode of the binary and the state-machine tests.
//! Fills are driven from the outside via the control methods; the simulator
//! never fills orders on its own.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{BotError, Result};

use super::{
    quantize, ExchangeGateway, InstrumentMeta, Order, OrderKind, OrderStatus, Position, Side,
};

#[derive(Debug)]
struct SimState {
    next_id: u64,
    orders: HashMap<String, Order>,
    position: Position,
    balance: f64,
    ask: f64,
    bid: f64,
}

/// Simulated gateway over a single instrument.
#[derive(Debug)]
pub struct SimGateway {
    meta: InstrumentMeta,
    state: Mutex<SimState>,
}

impl SimGateway {
    pub fn new(meta: InstrumentMeta, balance: f64) -> Self {
        Self {
            meta,
            state: Mutex::new(SimState {
                next_id: 1,
                orders: HashMap::new(),
                position: Position::default(),
                balance,
                ask: 0.0,
                bid: 0.0,
            }),
        }
    }

    // Control surface used by the paper runner and tests.

    pub fn set_quotes(&self, ask: f64, bid: f64) {
        let mut st = self.state.lock().unwrap();
        st.ask = quantize(ask, self.meta.price_tick);
        st.bid = quantize(bid, self.meta.price_tick);
    }

    pub fn open_position(&self, size: f64, is_long: bool, entry_price: f64, leverage: f64) {
        let mut st = self.state.lock().unwrap();
        st.position = Position {
            is_open: true,
            size,
            is_long: Some(is_long),
            entry_price,
            leverage,
        };
    }

    pub fn close_position(&self) {
        let mut st = self.state.lock().unwrap();
        st.position = Position::default();
    }

    /// Mark an order as executed and drop it from the open set.
    pub fn mark_order_closed(&self, order_id: &str) {
        let mut st = self.state.lock().unwrap();
        if let Some(order) = st.orders.get_mut(order_id) {
            order.status = OrderStatus::Closed;
            order.filled = order.size;
            order.remaining = 0.0;
        }
    }

    pub fn open_order_count(&self) -> usize {
        let st = self.state.lock().unwrap();
        st.orders
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .count()
    }

    fn next_order_id(st: &mut SimState) -> String {
        let id = format!("sim-{}", st.next_id);
        st.next_id += 1;
        id
    }
}

#[async_trait]
impl ExchangeGateway for SimGateway {
    fn id(&self) -> &str {
        &self.meta.exchange_id
    }

    fn meta(&self, _symbol: &str) -> InstrumentMeta {
        self.meta.clone()
    }

    fn price_to_precision(&self, _symbol: &str, price: f64) -> f64 {
        self.meta.price_to_precision(price)
    }

    fn amount_to_precision(&self, _symbol: &str, amount: f64) -> f64 {
        self.meta.amount_to_precision(amount)
    }

    fn contract_multiplier(&self, _symbol: &str) -> f64 {
        self.meta.contract_multiplier
    }

    fn maker_fee(&self) -> f64 {
        self.meta.maker_fee
    }

    fn taker_fee(&self) -> f64 {
        self.meta.taker_fee
    }

    async fn fetch_open_orders(&self, _symbol: &str) -> Result<Vec<Order>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .cloned()
            .collect())
    }

    async fn fetch_position(&self, _symbol: &str) -> Result<Position> {
        let st = self.state.lock().unwrap();
        Ok(st.position.clone())
    }

    async fn fetch_order(&self, _symbol: &str, order_id: &str) -> Result<Order> {
        let st = self.state.lock().unwrap();
        st.orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BotError::Gateway(format!("unknown order {order_id}")))
    }

    async fn ask_bid(&self, _symbol: &str) -> Result<(f64, f64)> {
        let st = self.state.lock().unwrap();
        if st.ask <= 0.0 || st.bid <= 0.0 {
            return Err(BotError::Gateway("no quotes available".to_string()));
        }
        Ok((st.ask, st.bid))
    }

    async fn total_balance(&self) -> Result<f64> {
        let st = self.state.lock().unwrap();
        Ok(st.balance)
    }

    async fn set_leverage(&self, _symbol: &str, leverage: f64) -> Result<f64> {
        Ok(leverage)
    }

    async fn create_limit_order(
        &self,
        _symbol: &str,
        side: Side,
        size: f64,
        price: f64,
        _reduce_only: bool,
    ) -> Result<Order> {
        let mut st = self.state.lock().unwrap();
        let id = Self::next_order_id(&mut st);
        let order = Order {
            id: id.clone(),
            side,
            kind: OrderKind::Limit,
            price: quantize(price, self.meta.price_tick),
            trigger_price: None,
            size: quantize(size, self.meta.lot_step),
            filled: 0.0,
            remaining: quantize(size, self.meta.lot_step),
            timestamp: Utc::now().timestamp_millis(),
            status: OrderStatus::Open,
        };
        st.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn create_stop_order(
        &self,
        _symbol: &str,
        side: Side,
        trigger_price: f64,
        size: f64,
    ) -> Result<Order> {
        let mut st = self.state.lock().unwrap();
        let trigger = quantize(trigger_price, self.meta.price_tick);
        // A stop that would fire the moment it rests is rejected, the same
        // sanity rule real venues apply to plan orders.
        match side {
            Side::Sell if st.ask > 0.0 && trigger >= st.ask => {
                return Err(BotError::Gateway(format!(
                    "sell stop trigger {trigger} at or above ask {} - would trigger immediately",
                    st.ask
                )));
            }
            Side::Buy if st.bid > 0.0 && trigger <= st.bid => {
                return Err(BotError::Gateway(format!(
                    "buy stop trigger {trigger} at or below bid {} - would trigger immediately",
                    st.bid
                )));
            }
            _ => {}
        }
        let id = Self::next_order_id(&mut st);
        let order = Order {
            id: id.clone(),
            side,
            kind: OrderKind::Stop,
            price: trigger,
            trigger_price: Some(trigger),
            size: quantize(size, self.meta.lot_step),
            filled: 0.0,
            remaining: quantize(size, self.meta.lot_step),
            timestamp: Utc::now().timestamp_millis(),
            status: OrderStatus::Open,
        };
        st.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        match st.orders.get_mut(order_id) {
            Some(order) if order.status == OrderStatus::Open => {
                order.status = OrderStatus::Canceled;
                Ok(())
            }
            Some(_) => Err(BotError::StaleOrder(format!(
                "order {order_id} is no longer open"
            ))),
            None => Err(BotError::Gateway(format!("unknown order {order_id}"))),
        }
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

    #[tokio::test]
    async fn test_limit_order_lifecycle() {
        let gw = SimGateway::new(test_meta(), 10_000.0);
        gw.set_quotes(100.01, 99.99);

        let order = gw
            .create_limit_order("ETH/USDT:USDT", Side::Buy, 0.5, 99.5, false)
            .await
            .unwrap();
        assert_eq!(order.kind, OrderKind::Limit);
        assert_eq!(gw.open_order_count(), 1);

        gw.cancel_order(&order.id, "ETH/USDT:USDT").await.unwrap();
        assert_eq!(gw.open_order_count(), 0);

        // cancelling twice reports a stale reference
        let err = gw.cancel_order(&order.id, "ETH/USDT:USDT").await;
        assert!(matches!(err, Err(BotError::StaleOrder(_))));
    }

    #[tokio::test]
    async fn test_stop_trigger_sanity() {
        let gw = SimGateway::new(test_meta(), 10_000.0);
        gw.set_quotes(100.01, 99.99);

        // sell stop below the ask is fine
        assert!(gw
            .create_stop_order("ETH/USDT:USDT", Side::Sell, 98.5, 1.0)
            .await
            .is_ok());
        // sell stop above the ask would trigger immediately
        assert!(gw
            .create_stop_order("ETH/USDT:USDT", Side::Sell, 100.5, 1.0)
            .await
            .is_err());
        // buy stop below the bid would trigger immediately
        assert!(gw
            .create_stop_order("ETH/USDT:USDT", Side::Buy, 99.0, 1.0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_closed_orders_leave_open_set() {
        let gw = SimGateway::new(test_meta(), 10_000.0);
        gw.set_quotes(100.01, 99.99);
        let order = gw
            .create_limit_order("ETH/USDT:USDT", Side::Sell, 1.0, 101.0, false)
            .await
            .unwrap();
        gw.mark_order_closed(&order.id);
        assert!(gw.fetch_open_orders("ETH/USDT:USDT").await.unwrap().is_empty());
        let fetched = gw.fetch_order("ETH/USDT:USDT", &order.id).await.unwrap();
        assert_eq!(fetched.status, OrderStatus::Closed);
        assert_eq!(fetched.remaining, 0.0);
    }
}
