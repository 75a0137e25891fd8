use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use ladderbot::config::Config;
use ladderbot::exchange::{ExchangeGateway, InstrumentMeta, SimGateway};
use ladderbot::signal::IdleSignalSource;
use ladderbot::tprintln;
use ladderbot::LadderBot;

/// LadderBot - DCA ladder trading bot
///
/// Position/order reconciliation loop for one symbol:
/// 1. Rebuilds the open-order cache and position every tick
/// 2. While flat: housekeeping, risk sizing, signal check, ladder placement
/// 3. While in position: stop-loss/take-profit maintenance and trailing exit
/// 4. Persists the active ladder so a restart can pick it back up
///
/// Live exchange adapters plug in through the gateway capability; this
/// binary wires the built-in simulated gateway (paper trading).
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tprintln!("{}", "═══════════════════════════════════════════════════".bright_cyan().bold());
    tprintln!("{}", "  LadderBot - DCA Ladder Trading".bright_cyan().bold());
    tprintln!("{}", "═══════════════════════════════════════════════════".bright_cyan().bold());
    tprintln!("");

    // Load configuration
    let mut config = Config::load_default().context("Failed to load config.json")?;
    config.validate().context("Invalid configuration")?;

    // Environment overrides
    dotenv::dotenv().ok();
    if let Ok(data_dir) = std::env::var("LADDERBOT_DATADIR") {
        config.data_dir = data_dir;
    }

    tprintln!("{} Symbol: {}", "[CONFIG]".blue().bold(), config.symbol.bright_white().bold());
    tprintln!("{} Model: {}", "[CONFIG]".blue().bold(), config.model_kind.bright_white());
    tprintln!("{} Risk per Trade: {}", "[CONFIG]".blue().bold(), format!("{:.2}%", config.max_account_risk_per_trade * 100.0).bright_white());
    tprintln!("{} Reward/Risk Ratio: {}", "[CONFIG]".blue().bold(), format!("{}", config.reward_risk_ratio).green().bold());
    tprintln!("{} Ladder Rungs: {}", "[CONFIG]".blue().bold(), format!("{}", config.num_rungs).bright_white());
    tprintln!("{} Price Deviation per Rung: {}", "[CONFIG]".blue().bold(), format!("{:.2}%", config.price_dev * 100.0).bright_white());
    tprintln!("{} Leverage: {}", "[CONFIG]".blue().bold(), format!("{}x", config.leverage).bright_white());
    tprintln!("{} Refresh Timeout: {}", "[CONFIG]".blue().bold(), format!("{} secs", config.refresh_timeout_secs).bright_white());
    tprintln!("{} Data Dir: {}", "[CONFIG]".blue().bold(), config.data_dir.bright_white());
    if config.not_trading {
        tprintln!("{} {}", "[CONFIG]".blue().bold(), "NOT TRADING (dry run)".yellow().bold());
    }
    tprintln!("");

    // Paper-trading gateway over the simulated instrument
    let meta = InstrumentMeta {
        exchange_id: "paper".to_string(),
        symbol: config.symbol.clone(),
        price_tick: config.paper_price_tick,
        lot_step: config.paper_lot_step,
        contract_multiplier: config.paper_contract_multiplier,
        maker_fee: config.maker_fee_bps / 10_000.0,
        taker_fee: config.taker_fee_bps / 10_000.0,
    };
    let gateway = Arc::new(SimGateway::new(meta, config.paper_balance));
    let start = config.paper_start_price;
    gateway.set_quotes(
        gateway.price_to_precision(&config.symbol, start + config.paper_price_tick),
        gateway.price_to_precision(&config.symbol, start - config.paper_price_tick),
    );

    tprintln!("{} {}", "[INIT]".cyan().bold(), "Paper gateway initialized".green());

    // Cooperative shutdown: observed between ticks only
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        signal::ctrl_c().await.ok();
        tprintln!("{} {}", "[SHUTDOWN]".cyan().bold(), "Ctrl-C received, stopping after this tick".yellow());
        shutdown_tx.send(true).ok();
    });

    let mut bot = LadderBot::new(
        gateway,
        Box::new(IdleSignalSource),
        config,
        shutdown_rx,
    )
    .context("Failed to initialize bot")?;

    tprintln!("{} {}", "[INIT]".cyan().bold(), "Entering the main loop".green());
    tprintln!("");

    bot.run().await.context("Bot loop terminated with an error")?;

    Ok(())
}
