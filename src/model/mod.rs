//! Order models: given risk inputs, where do the entry, stop-loss and
//! take-profit orders go.

pub mod fixed;
pub mod ladder;
pub mod store;

pub use fixed::FixedTpslModel;
pub use ladder::{LadderModel, LadderParams, LadderRung};
pub use store::LadderStore;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::exchange::Side;

/// Trade direction the model is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// Side that opens or grows the position.
    pub fn entry_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Side that reduces or closes the position.
    pub fn exit_side(&self) -> Side {
        self.entry_side().opposite()
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a model variant can produce. Static per variant, replacing the
/// inherited capability flags of a class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Places its own resting entry orders (the ladder does, the fixed model
    /// places a single entry order through the bot).
    pub generates_entry_ladder: bool,
    pub generates_stop: bool,
    pub generates_take_profit: bool,
}

/// The two order model variants behind one uniform query surface.
#[derive(Debug)]
pub enum OrderModel {
    Ladder(LadderModel),
    FixedTpsl(FixedTpslModel),
}

impl OrderModel {
    pub fn direction(&self) -> Direction {
        match self {
            OrderModel::Ladder(m) => m.direction(),
            OrderModel::FixedTpsl(m) => m.direction(),
        }
    }

    pub fn capabilities(&self) -> ModelCapabilities {
        match self {
            OrderModel::Ladder(_) => ModelCapabilities {
                generates_entry_ladder: true,
                generates_stop: true,
                generates_take_profit: true,
            },
            OrderModel::FixedTpsl(_) => ModelCapabilities {
                generates_entry_ladder: false,
                generates_stop: true,
                generates_take_profit: true,
            },
        }
    }

    /// Stop-loss price and size. The ladder answers from its own rows and
    /// ignores the inputs; the fixed model derives from the inputs.
    pub fn stop_price_size(&self, input_size: f64, input_price: f64) -> Result<(f64, f64)> {
        match self {
            OrderModel::Ladder(m) => m.stop_price_size(),
            OrderModel::FixedTpsl(m) => Ok(m.stop_price_size(input_size, input_price)),
        }
    }

    /// Take-profit price and size for the given live position size.
    pub fn take_profit_price_size(&self, input_size: f64, input_price: f64) -> Result<(f64, f64)> {
        match self {
            OrderModel::Ladder(m) => m.take_profit_price_size(input_size),
            OrderModel::FixedTpsl(m) => Ok(m.take_profit_price_size(input_size, input_price)),
        }
    }

    /// Risk-based order size for a single entry at `asset_price`.
    pub fn order_size(&self, asset_price: f64, risk_per_trade: f64) -> Result<f64> {
        match self {
            OrderModel::Ladder(m) => m.base_size(asset_price, risk_per_trade),
            OrderModel::FixedTpsl(m) => m.order_size(asset_price, risk_per_trade),
        }
    }

    /// Activation price and trail distance for the trailing stop controller,
    /// when the model can provide them.
    pub fn trailing_trigger(&self, input_size: f64, entry_price: f64) -> Option<(f64, f64)> {
        match self {
            OrderModel::Ladder(m) => m.trailing_trigger(input_size),
            OrderModel::FixedTpsl(m) => Some(m.trailing_trigger(entry_price)),
        }
    }

    pub fn as_ladder(&self) -> Option<&LadderModel> {
        match self {
            OrderModel::Ladder(m) => Some(m),
            OrderModel::FixedTpsl(_) => None,
        }
    }

    pub fn as_ladder_mut(&mut self) -> Option<&mut LadderModel> {
        match self {
            OrderModel::Ladder(m) => Some(m),
            OrderModel::FixedTpsl(_) => None,
        }
    }
}
