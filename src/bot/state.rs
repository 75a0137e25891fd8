//! Per-trade mutable state owned by the position state machine.

use crate::trailing::TrailingStop;

/// Lifecycle phase of the traded symbol, for logging and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePhase {
    /// No position, waiting for entry signals.
    Flat,
    /// Entry orders are being evaluated/placed this tick.
    Entering,
    /// Holding a position, maintaining protective orders.
    InPosition,
    /// Holding a position and actively working an exit.
    Exiting,
    /// Shutdown requested, no new orders.
    Shutdown,
}

impl std::fmt::Display for TradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradePhase::Flat => "flat",
            TradePhase::Entering => "entering",
            TradePhase::InPosition => "in_position",
            TradePhase::Exiting => "exiting",
            TradePhase::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Remembered order references and previous-tick position values.
///
/// Single owner: the state machine. Handlers receive it by reference; only
/// the state machine clears it between trades.
#[derive(Debug, Default)]
pub struct PositionContext {
    /// Live protective order references.
    pub last_tp_order_id: Option<String>,
    pub last_sl_order_id: Option<String>,
    /// References stashed when the cache reports the live ids gone, so
    /// finish-trade accounting can still look the orders up.
    pub finished_tp_order_id: Option<String>,
    pub finished_sl_order_id: Option<String>,
    /// Fixed-model resting entry orders.
    pub current_buy_order_id: Option<String>,
    pub current_sell_order_id: Option<String>,
    /// Previous tick's position, retained across the open->flat transition
    /// for finish-trade accounting.
    pub last_was_open: bool,
    pub last_was_long: Option<bool>,
    pub last_size: f64,
    pub last_entry_price: f64,
    /// Running realized pnl since the bot started.
    pub cum_pnl: f64,
    /// Set while an exit order is being worked.
    pub exiting: bool,
    pub trailing: TrailingStop,
}

impl PositionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the in-position snapshot at the end of an open tick.
    pub fn record_open_tick(&mut self, size: f64, is_long: Option<bool>, entry_price: f64) {
        self.last_was_open = true;
        self.last_was_long = is_long;
        self.last_size = size;
        self.last_entry_price = entry_price;
    }

    /// Reset everything per-trade after finish-trade accounting ran.
    /// `cum_pnl` survives.
    pub fn reset_after_trade(&mut self) {
        self.last_tp_order_id = None;
        self.last_sl_order_id = None;
        self.finished_tp_order_id = None;
        self.finished_sl_order_id = None;
        self.last_was_open = false;
        self.last_was_long = None;
        self.last_size = 0.0;
        self.last_entry_price = 0.0;
        self.exiting = false;
        self.trailing.reset();
    }

    pub fn phase(&self, position_open: bool) -> TradePhase {
        if position_open {
            if self.exiting {
                TradePhase::Exiting
            } else {
                TradePhase::InPosition
            }
        } else {
            TradePhase::Flat
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direction;

    #[test]
    fn test_reset_preserves_cum_pnl() {
        let mut ctx = PositionContext::new();
        ctx.cum_pnl = 12.5;
        ctx.last_tp_order_id = Some("tp-1".to_string());
        ctx.record_open_tick(2.0, Some(true), 100.0);
        ctx.exiting = true;
        ctx.trailing
            .update(Direction::Long, 105.0, 1.0, 106.0, 105.9);
        assert!(ctx.trailing.triggered());

        ctx.reset_after_trade();
        assert_eq!(ctx.cum_pnl, 12.5);
        assert!(ctx.last_tp_order_id.is_none());
        assert!(!ctx.last_was_open);
        assert!(!ctx.exiting);
        assert!(!ctx.trailing.triggered());
    }

    #[test]
    fn test_phase() {
        let mut ctx = PositionContext::new();
        assert_eq!(ctx.phase(false), TradePhase::Flat);
        assert_eq!(ctx.phase(true), TradePhase::InPosition);
        ctx.exiting = true;
        assert_eq!(ctx.phase(true), TradePhase::Exiting);
    }
}
