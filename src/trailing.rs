//! Trailing stop controller.
//!
//! Tracks a ratcheting exit threshold once the activation price is crossed.
//! Reset whenever the position goes flat. Callers quantize all prices to the
//! instrument tick before passing them in, otherwise float noise makes the
//! threshold oscillate.

use crate::model::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailAction {
    Hold,
    /// The trail threshold was crossed back: close the position now.
    ExitNow,
}

#[derive(Debug, Clone, Default)]
pub struct TrailingStop {
    last_trail_price: Option<f64>,
    triggered: bool,
}

impl TrailingStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_trail_price = None;
        self.triggered = false;
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }

    pub fn last_trail_price(&self) -> Option<f64> {
        self.last_trail_price
    }

    /// Advance the controller one tick.
    ///
    /// Long: once `bid >= trigger_price` the controller arms and the trail
    /// price only ratchets upward (`max`). While unarmed it still tracks the
    /// naive `bid - trail_value` so it is ready the instant the trigger
    /// condition is met. Short is symmetric with ask/bid swapped and the
    /// ratchet inverted.
    pub fn update(
        &mut self,
        direction: Direction,
        trigger_price: f64,
        trail_value: f64,
        ask: f64,
        bid: f64,
    ) -> TrailAction {
        match direction {
            Direction::Long => {
                let candidate = bid - trail_value;
                if !self.triggered {
                    if bid >= trigger_price {
                        self.triggered = true;
                    }
                    self.last_trail_price = Some(candidate);
                } else {
                    let current = self.last_trail_price.unwrap_or(candidate);
                    self.last_trail_price = Some(current.max(candidate));
                }
                if self.triggered {
                    if let Some(trail) = self.last_trail_price {
                        if ask <= trail {
                            return TrailAction::ExitNow;
                        }
                    }
                }
            }
            Direction::Short => {
                let candidate = ask + trail_value;
                if !self.triggered {
                    if ask <= trigger_price {
                        self.triggered = true;
                    }
                    self.last_trail_price = Some(candidate);
                } else {
                    let current = self.last_trail_price.unwrap_or(candidate);
                    self.last_trail_price = Some(current.min(candidate));
                }
                if self.triggered {
                    if let Some(trail) = self.last_trail_price {
                        if bid >= trail {
                            return TrailAction::ExitNow;
                        }
                    }
                }
            }
        }
        TrailAction::Hold
    }
}
