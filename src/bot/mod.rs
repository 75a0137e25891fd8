pub mod state;

pub use state::{PositionContext, TradePhase};
