use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Application configuration loaded from config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trading symbol (e.g., "ETH/USDT:USDT")
    pub symbol: String,

    /// Seconds between ticks of the main loop
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Entry evaluation debounce: while flat, signals and housekeeping run at
    /// most once per this many seconds
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,

    /// Pause after a burst of cancellations before placing new orders, to let
    /// the exchange converge
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Leverage requested for the symbol before the loop starts
    #[serde(default = "default_leverage")]
    pub leverage: f64,

    /// Fraction of the account balance risked per trade (e.g., 0.01 = 1%)
    #[serde(default = "default_max_account_risk")]
    pub max_account_risk_per_trade: f64,

    /// Targeted reward relative to the next unfilled rung's loss (crv)
    #[serde(default = "default_reward_risk_ratio")]
    pub reward_risk_ratio: f64,

    /// Minimum return on equity used for the take-profit floor
    #[serde(default = "default_min_roe")]
    pub min_roe: f64,

    /// Distance factor applied on top of the min-ROE floor (short side only)
    #[serde(default = "default_min_roe_trigger_distance")]
    pub min_roe_trigger_distance: f64,

    /// Order model: "ladder" or "fixed"
    #[serde(default = "default_model_kind")]
    pub model_kind: String,

    /// Ladder rows including the stop row (at least 3)
    #[serde(default = "default_num_rungs")]
    pub num_rungs: usize,

    /// Per-rung fractional price deviation (e.g., 0.005 = 0.5%)
    #[serde(default = "default_price_dev")]
    pub price_dev: f64,

    /// Rescue rung size multiplier after the first rescue
    #[serde(default = "default_save_scale")]
    pub save_scale: f64,

    /// First rescue rung size relative to the base rung
    #[serde(default = "default_base_to_save_mult")]
    pub base_to_save_mult: f64,

    /// Fixed model: take-profit offset from entry (e.g., 0.01 = 1%)
    #[serde(default = "default_tp_pct")]
    pub tp_pct: f64,

    /// Fixed model: stop-loss offset from entry
    #[serde(default = "default_sl_pct")]
    pub sl_pct: f64,

    /// Trailing stop arms this far past the entry price
    #[serde(default = "default_trail_trigger_pct")]
    pub trail_trigger_pct: f64,

    /// Trailing stop distance as a fraction of the entry price
    #[serde(default = "default_trail_value_pct")]
    pub trail_value_pct: f64,

    /// Evaluate and log orders without placing them
    #[serde(default = "default_not_trading")]
    pub not_trading: bool,

    /// Directory for persisted ladder records
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// CSV trade history file
    #[serde(default = "default_trade_log_file")]
    pub trade_log_file: String,

    /// Paper mode: simulated account balance
    #[serde(default = "default_paper_balance")]
    pub paper_balance: f64,

    /// Paper mode: starting mid price
    #[serde(default = "default_paper_start_price")]
    pub paper_start_price: f64,

    /// Paper mode: price tick of the simulated instrument
    #[serde(default = "default_paper_price_tick")]
    pub paper_price_tick: f64,

    /// Paper mode: size step of the simulated instrument
    #[serde(default = "default_paper_lot_step")]
    pub paper_lot_step: f64,

    /// Paper mode: contract multiplier of the simulated instrument
    #[serde(default = "default_paper_contract_multiplier")]
    pub paper_contract_multiplier: f64,

    /// Maker fee in basis points (e.g., 2.0 = 0.02%)
    #[serde(default = "default_maker_fee_bps")]
    pub maker_fee_bps: f64,

    /// Taker fee in basis points
    #[serde(default = "default_taker_fee_bps")]
    pub taker_fee_bps: f64,
}

// Default values
fn default_tick_interval() -> u64 {
    1
}

fn default_refresh_timeout() -> u64 {
    120
}

fn default_settle_delay() -> u64 {
    500
}

fn default_leverage() -> f64 {
    50.0
}

fn default_max_account_risk() -> f64 {
    0.01 // 1%
}

fn default_reward_risk_ratio() -> f64 {
    0.525
}

fn default_min_roe() -> f64 {
    0.01 // 1%
}

fn default_min_roe_trigger_distance() -> f64 {
    0.75
}

fn default_model_kind() -> String {
    "ladder".to_string()
}

fn default_num_rungs() -> usize {
    4
}

fn default_price_dev() -> f64 {
    0.005 // 0.5% per rung
}

fn default_save_scale() -> f64 {
    2.0
}

fn default_base_to_save_mult() -> f64 {
    1.0
}

fn default_tp_pct() -> f64 {
    0.01
}

fn default_sl_pct() -> f64 {
    0.0066
}

fn default_trail_trigger_pct() -> f64 {
    0.005
}

fn default_trail_value_pct() -> f64 {
    0.002
}

fn default_not_trading() -> bool {
    false
}

fn default_data_dir() -> String {
    "ladder_data".to_string()
}

fn default_trade_log_file() -> String {
    "trades_history.csv".to_string()
}

fn default_paper_balance() -> f64 {
    10_000.0
}

fn default_paper_start_price() -> f64 {
    100.0
}

fn default_paper_price_tick() -> f64 {
    0.01
}

fn default_paper_lot_step() -> f64 {
    0.001
}

fn default_paper_contract_multiplier() -> f64 {
    1.0
}

fn default_maker_fee_bps() -> f64 {
    2.0
}

fn default_taker_fee_bps() -> f64 {
    6.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "ETH/USDT:USDT".to_string(),
            tick_interval_secs: default_tick_interval(),
            refresh_timeout_secs: default_refresh_timeout(),
            settle_delay_ms: default_settle_delay(),
            leverage: default_leverage(),
            max_account_risk_per_trade: default_max_account_risk(),
            reward_risk_ratio: default_reward_risk_ratio(),
            min_roe: default_min_roe(),
            min_roe_trigger_distance: default_min_roe_trigger_distance(),
            model_kind: default_model_kind(),
            num_rungs: default_num_rungs(),
            price_dev: default_price_dev(),
            save_scale: default_save_scale(),
            base_to_save_mult: default_base_to_save_mult(),
            tp_pct: default_tp_pct(),
            sl_pct: default_sl_pct(),
            trail_trigger_pct: default_trail_trigger_pct(),
            trail_value_pct: default_trail_value_pct(),
            not_trading: default_not_trading(),
            data_dir: default_data_dir(),
            trade_log_file: default_trade_log_file(),
            paper_balance: default_paper_balance(),
            paper_start_price: default_paper_start_price(),
            paper_price_tick: default_paper_price_tick(),
            paper_lot_step: default_paper_lot_step(),
            paper_contract_multiplier: default_paper_contract_multiplier(),
            maker_fee_bps: default_maker_fee_bps(),
            taker_fee_bps: default_taker_fee_bps(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration from default location (config.json)
    pub fn load_default() -> Result<Self> {
        Self::from_file("config.json")
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.symbol.is_empty(), "Symbol cannot be empty");

        anyhow::ensure!(
            self.tick_interval_secs > 0,
            "Tick interval must be greater than 0"
        );

        anyhow::ensure!(
            self.model_kind == "ladder" || self.model_kind == "fixed",
            "Invalid model kind: {}. Must be one of: ladder, fixed",
            self.model_kind
        );

        anyhow::ensure!(
            self.num_rungs >= 3,
            "Number of ladder rungs {} too small, must be at least 3",
            self.num_rungs
        );

        anyhow::ensure!(
            self.price_dev > 0.0,
            "Price deviation must be greater than 0"
        );

        anyhow::ensure!(
            self.save_scale >= 1.0,
            "Save scale must be at least 1.0"
        );

        anyhow::ensure!(
            self.max_account_risk_per_trade > 0.0 && self.max_account_risk_per_trade <= 1.0,
            "Account risk per trade must be between 0 and 1"
        );

        anyhow::ensure!(
            self.reward_risk_ratio > 0.0,
            "Reward/risk ratio must be greater than 0"
        );

        anyhow::ensure!(self.leverage > 0.0, "Leverage must be greater than 0");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.symbol, "ETH/USDT:USDT");
        assert_eq!(config.tick_interval_secs, 1);
        assert_eq!(config.refresh_timeout_secs, 120);
        assert_eq!(config.model_kind, "ladder");
        assert_eq!(config.num_rungs, 4);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        // Test invalid model kind
        config.model_kind = "grid".to_string();
        assert!(config.validate().is_err());

        // Test too few ladder rungs
        config.model_kind = "ladder".to_string();
        config.num_rungs = 2;
        assert!(config.validate().is_err());

        config.num_rungs = 4;
        config.max_account_risk_per_trade = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let mut config = Config::default();
        config.symbol = "BTC/USDT:USDT".to_string();
        config.num_rungs = 5;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.symbol, "BTC/USDT:USDT");
        assert_eq!(loaded.num_rungs, 5);
        // defaults fill unspecified fields
        assert_eq!(loaded.refresh_timeout_secs, 120);
    }
}
