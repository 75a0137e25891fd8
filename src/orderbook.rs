//! Snapshot cache of the currently open orders.
//!
//! Rebuilt wholesale from a single exchange query on every tick; never merged
//! with the previous tick's data. Stale orders are dropped, not retained, so
//! the cache always reflects only what the exchange currently reports.

use std::collections::HashMap;

use crate::exchange::{Order, OrderKind, Side};

/// Presence of the two remembered protective order ids in the latest
/// snapshot. An absent id means the order was filled or cancelled externally
/// and the owner must clear its reference.
#[derive(Debug, Clone, Copy)]
pub struct RememberedPresence {
    pub take_profit_found: bool,
    pub stop_found: bool,
}

#[derive(Debug, Default)]
struct SideIndex {
    buy_by_price: HashMap<u64, Order>,
    sell_by_price: HashMap<u64, Order>,
    buy_by_id: HashMap<String, Order>,
    sell_by_id: HashMap<String, Order>,
}

impl SideIndex {
    fn clear(&mut self) {
        self.buy_by_price.clear();
        self.sell_by_price.clear();
        self.buy_by_id.clear();
        self.sell_by_id.clear();
    }

    fn insert(&mut self, key_price: f64, order: Order) {
        let key = price_key(key_price);
        match order.side {
            Side::Buy => {
                self.buy_by_price.insert(key, order.clone());
                self.buy_by_id.insert(order.id.clone(), order);
            }
            Side::Sell => {
                self.sell_by_price.insert(key, order.clone());
                self.sell_by_id.insert(order.id.clone(), order);
            }
        }
    }

    fn by_price(&self, side: Side) -> &HashMap<u64, Order> {
        match side {
            Side::Buy => &self.buy_by_price,
            Side::Sell => &self.sell_by_price,
        }
    }

    fn by_id(&self, side: Side) -> &HashMap<String, Order> {
        match side {
            Side::Buy => &self.buy_by_id,
            Side::Sell => &self.sell_by_id,
        }
    }
}

/// Open orders indexed by (side, price) and (side, id), split into limit and
/// stop order indices, plus the convenience lists handlers iterate.
///
/// Prices are expected to be quantized to the instrument tick before they
/// reach the cache; the price key is the quantized price's bit pattern, so
/// lookups are exact.
#[derive(Debug, Default)]
pub struct OrderBookCache {
    limit: SideIndex,
    stop: SideIndex,
    /// Limit sells.
    pub asks: Vec<Order>,
    /// Limit buys.
    pub bids: Vec<Order>,
    /// Sell-side stops (protecting long positions).
    pub long_stops: Vec<Order>,
    /// Buy-side stops (protecting short positions).
    pub short_stops: Vec<Order>,
}

fn price_key(price: f64) -> u64 {
    price.to_bits()
}

impl OrderBookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild every index from a freshly fetched order list and report
    /// whether the remembered take-profit / stop ids are still present.
    pub fn refresh(
        &mut self,
        open_orders: &[Order],
        last_tp_order_id: Option<&str>,
        last_sl_order_id: Option<&str>,
    ) -> RememberedPresence {
        self.limit.clear();
        self.stop.clear();
        self.asks.clear();
        self.bids.clear();
        self.long_stops.clear();
        self.short_stops.clear();

        let mut presence = RememberedPresence {
            take_profit_found: false,
            stop_found: false,
        };

        for order in open_orders {
            if Some(order.id.as_str()) == last_tp_order_id {
                presence.take_profit_found = true;
            }
            if Some(order.id.as_str()) == last_sl_order_id {
                presence.stop_found = true;
            }

            match order.kind {
                OrderKind::Limit => {
                    self.limit.insert(order.price, order.clone());
                    match order.side {
                        Side::Sell => self.asks.push(order.clone()),
                        Side::Buy => self.bids.push(order.clone()),
                    }
                }
                OrderKind::Stop => {
                    let trigger = order.trigger_price.unwrap_or(order.price);
                    self.stop.insert(trigger, order.clone());
                    match order.side {
                        Side::Sell => self.long_stops.push(order.clone()),
                        Side::Buy => self.short_stops.push(order.clone()),
                    }
                }
            }
        }

        presence
    }

    /// Exact price and size match, anything else is a miss.
    pub fn matching_limit_order(&self, side: Side, price: f64, size: f64) -> Option<&Order> {
        self.limit
            .by_price(side)
            .get(&price_key(price))
            .filter(|o| o.size == size)
    }

    /// Exact trigger-price and size match for stop orders.
    pub fn matching_stop_order(&self, side: Side, trigger_price: f64, size: f64) -> Option<&Order> {
        self.stop
            .by_price(side)
            .get(&price_key(trigger_price))
            .filter(|o| o.size == size)
    }

    pub fn has_order(&self, kind: OrderKind, side: Side, order_id: &str) -> bool {
        match kind {
            OrderKind::Limit => self.limit.by_id(side).contains_key(order_id),
            OrderKind::Stop => self.stop.by_id(side).contains_key(order_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty()
            && self.bids.is_empty()
            && self.long_stops.is_empty()
            && self.short_stops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::OrderStatus;

    fn order(id: &str, side: Side, kind: OrderKind, price: f64, size: f64) -> Order {
        Order {
            id: id.to_string(),
            side,
            kind,
            price,
            trigger_price: (kind == OrderKind::Stop).then_some(price),
            size,
            filled: 0.0,
            remaining: size,
            timestamp: 0,
            status: OrderStatus::Open,
        }
    }

    #[test]
    fn test_refresh_classifies_orders() {
        let mut cache = OrderBookCache::new();
        let orders = vec![
            order("1", Side::Sell, OrderKind::Limit, 101.0, 1.0),
            order("2", Side::Buy, OrderKind::Limit, 99.0, 2.0),
            order("3", Side::Sell, OrderKind::Stop, 95.0, 3.0),
            order("4", Side::Buy, OrderKind::Stop, 105.0, 4.0),
        ];
        cache.refresh(&orders, None, None);

        assert_eq!(cache.asks.len(), 1);
        assert_eq!(cache.bids.len(), 1);
        assert_eq!(cache.long_stops.len(), 1);
        assert_eq!(cache.short_stops.len(), 1);
        assert!(cache.has_order(OrderKind::Stop, Side::Sell, "3"));
        assert!(!cache.has_order(OrderKind::Limit, Side::Sell, "3"));
    }

    #[test]
    fn test_matching_is_exact_on_price_and_size() {
        let mut cache = OrderBookCache::new();
        cache.refresh(
            &[order("1", Side::Sell, OrderKind::Limit, 101.0, 1.5)],
            None,
            None,
        );

        assert!(cache.matching_limit_order(Side::Sell, 101.0, 1.5).is_some());
        // size off by one step: no match
        assert!(cache.matching_limit_order(Side::Sell, 101.0, 1.501).is_none());
        // price off by one tick: no match
        assert!(cache.matching_limit_order(Side::Sell, 101.01, 1.5).is_none());
        // wrong side: no match
        assert!(cache.matching_limit_order(Side::Buy, 101.0, 1.5).is_none());
    }

    #[test]
    fn test_remembered_presence() {
        let mut cache = OrderBookCache::new();
        let orders = vec![
            order("tp-1", Side::Sell, OrderKind::Limit, 101.0, 1.0),
            order("sl-1", Side::Sell, OrderKind::Stop, 95.0, 1.0),
        ];
        let presence = cache.refresh(&orders, Some("tp-1"), Some("sl-9"));
        assert!(presence.take_profit_found);
        assert!(!presence.stop_found);
    }

    #[test]
    fn test_refresh_drops_previous_snapshot() {
        let mut cache = OrderBookCache::new();
        cache.refresh(
            &[order("1", Side::Buy, OrderKind::Limit, 99.0, 1.0)],
            None,
            None,
        );
        assert!(!cache.is_empty());
        cache.refresh(&[], None, None);
        assert!(cache.is_empty());
        assert!(cache.matching_limit_order(Side::Buy, 99.0, 1.0).is_none());
    }
}
