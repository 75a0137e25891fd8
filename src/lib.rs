// Library exports for ladderbot

pub mod app;
pub mod bot;
pub mod config;
pub mod error;
pub mod exchange;
pub mod model;
pub mod orderbook;
pub mod signal;
pub mod trade_log;
pub mod trailing;

// Re-export commonly used items for convenience
pub use app::LadderBot;
pub use config::Config;
pub use error::{BotError, Result};

/// Timestamped colored console output for operator-facing lines.
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => {{
        use colored::Colorize;
        println!("{} {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string().bright_black(),
            format!($($arg)*)
        );
    }};
}
