//! Signal source capability.
//!
//! Indicator logic lives outside the core; the bot only consumes the signal
//! record shape. Absence of a direction means no signal in that direction.

use async_trait::async_trait;

use crate::error::Result;

/// Optional price proposals attached to a signal.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalHint {
    pub limit: Option<f64>,
    pub stop: Option<f64>,
    pub take_profit: Option<f64>,
}

impl SignalHint {
    /// The entry price for this signal: the proposed limit price when the
    /// source generates one, otherwise the top-of-book fallback (bid for
    /// buys, ask for sells).
    pub fn entry_price(&self, fallback: f64) -> f64 {
        self.limit.unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Signal {
    pub buy: Option<SignalHint>,
    pub sell: Option<SignalHint>,
}

impl Signal {
    pub fn is_empty(&self) -> bool {
        self.buy.is_none() && self.sell.is_none()
    }

    pub fn buy_only(&self) -> bool {
        self.buy.is_some() && self.sell.is_none()
    }

    pub fn sell_only(&self) -> bool {
        self.sell.is_some() && self.buy.is_none()
    }
}

#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Entry signal, consulted while flat.
    async fn signal(&self, ask: f64, bid: f64) -> Result<Signal>;

    /// Exit signal, consulted only while in a position.
    async fn exit_signal(&self, ask: f64, bid: f64) -> Result<Signal>;
}

/// Source that never signals. Placeholder wiring for paper runs and tests.
#[derive(Debug, Default)]
pub struct IdleSignalSource;

#[async_trait]
impl SignalSource for IdleSignalSource {
    async fn signal(&self, _ask: f64, _bid: f64) -> Result<Signal> {
        Ok(Signal::default())
    }

    async fn exit_signal(&self, _ask: f64, _bid: f64) -> Result<Signal> {
        Ok(Signal::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_price_fallback() {
        let hint = SignalHint::default();
        assert_eq!(hint.entry_price(99.5), 99.5);
        let hint = SignalHint {
            limit: Some(98.0),
            ..Default::default()
        };
        assert_eq!(hint.entry_price(99.5), 98.0);
    }

    #[test]
    fn test_signal_shape_helpers() {
        let sig = Signal {
            sell: Some(SignalHint::default()),
            buy: None,
        };
        assert!(sig.sell_only());
        assert!(!sig.buy_only());
        assert!(!sig.is_empty());
        assert!(Signal::default().is_empty());
    }
}
