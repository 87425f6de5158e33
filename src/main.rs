//! Multi-Strategy Trading Bot
//!
//! Runs DCA laddering, Bollinger-corridor trend detection, and
//! portfolio-following rebalancing over configured pairs, against any broker
//! that satisfies the trade-API capability traits.

mod api;
mod config;
mod db;
mod engine;
mod indicators;
mod models;
mod strategies;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{PaperApi, PaperConfig, TradeApi};
use crate::config::{load_trade_config, UserConfig};
use crate::db::{MemoryStore, SqliteStore, Stores};
use crate::models::{Candle, CandlesConfig, Pair};
use crate::strategies::run_cycle;

/// Multi-strategy trading bot CLI.
#[derive(Parser)]
#[command(name = "stratbot")]
#[command(about = "Run DCA, corridor-trend, and portfolio-following strategies", long_about = None)]
struct Cli {
    /// Trade config file path
    #[arg(short, long, default_value = "trade-config.json")]
    config: PathBuf,

    /// Database file path
    #[arg(short, long, default_value = "sqlite:./stratbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule every configured pair on its interval
    Run,

    /// Run a single strategy cycle for one configured pair
    Once {
        /// User id from the trade config
        user: String,

        /// Pair symbol, e.g. BNBUSDT
        pair: String,
    },

    /// Replay a candle file through the paper broker
    Paper {
        /// JSON file with an array of candles
        candles: PathBuf,

        /// Strategy to replay
        #[arg(short, long, default_value = "corridor_trend")]
        strategy: String,

        /// Candle interval of the series
        #[arg(short, long, default_value = "15m")]
        interval: String,

        /// Candles per chunk
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Minimum lot size in the funding currency
        #[arg(long, default_value = "10")]
        min_lot: f64,
    },

    /// Show the parsed trade configuration
    Config,
}

/// Paper broker settings inside the trade config's `apis` map.
#[derive(Debug, Deserialize)]
struct PaperApiConfig {
    candles_file: PathBuf,

    #[serde(default = "default_min_lot")]
    min_lot: Decimal,

    #[serde(default)]
    balances: HashMap<String, Decimal>,
}

fn default_min_lot() -> Decimal {
    dec!(1)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run => {
            let users = load_trade_config(&cli.config)?;
            let store = Arc::new(SqliteStore::new(&cli.database).await?);
            let stores = Stores::from_backend(store);

            let mut tasks = Vec::new();
            for user in users {
                let apis = build_user_apis(&user);
                for pair in user.pairs {
                    let Some(api) = apis.get(&pair.api_name).cloned() else {
                        error!(user = %user.id, api = %pair.api_name, "api not found");
                        continue;
                    };
                    let stores = stores.clone();
                    let user_id = user.id.clone();
                    let period =
                        std::time::Duration::from_secs(pair.schedule_secs.unwrap_or(60));
                    tasks.push(tokio::spawn(async move {
                        let mut ticker = tokio::time::interval(period);
                        loop {
                            // one invocation per pair/user at a time
                            ticker.tick().await;
                            run_cycle(&pair, api.clone(), &stores, &user_id).await;
                        }
                    }));
                }
            }

            if tasks.is_empty() {
                println!("No runnable pairs in {}.", cli.config.display());
                return Ok(());
            }

            println!("Scheduled {} pair(s). Press Ctrl+C to stop.", tasks.len());
            tokio::signal::ctrl_c().await?;
            println!("\nStopping...");
            for task in tasks {
                task.abort();
            }
        }

        Commands::Once { user, pair } => {
            let users = load_trade_config(&cli.config)?;
            let user_config = users
                .iter()
                .find(|u| u.id == user)
                .with_context(|| format!("user {user} not found in config"))?;
            let pair_config = user_config
                .pairs
                .iter()
                .find(|p| p.symbol() == pair)
                .with_context(|| format!("pair {pair} not found for user {user}"))?;

            let apis = build_user_apis(user_config);
            let api = apis
                .get(&pair_config.api_name)
                .cloned()
                .with_context(|| format!("{} - api not found", pair_config.api_name))?;

            let store = Arc::new(SqliteStore::new(&cli.database).await?);
            let stores = Stores::from_backend(store);

            info!(user = %user, pair = %pair, strategy = %pair_config.strategy, "running single cycle");
            run_cycle(pair_config, api, &stores, &user).await;
        }

        Commands::Paper {
            candles,
            strategy,
            interval,
            limit,
            min_lot,
        } => {
            let series = load_candles(&candles)?;
            println!("Replaying {} candles through '{}'...", series.len(), strategy);

            let paper = Arc::new(PaperApi::new(PaperConfig {
                candles: series,
                min_lot: Decimal::try_from(min_lot)?,
                balances: HashMap::from([
                    ("USDT".to_string(), dec!(100000)),
                    ("BNB".to_string(), dec!(100000)),
                ]),
            }));
            let stores = Stores::from_backend(Arc::new(MemoryStore::new()));
            let pair = Pair {
                api_name: "paper".to_string(),
                strategy,
                schedule_secs: None,
                candles: CandlesConfig {
                    interval,
                    limit,
                    from: None,
                    to: None,
                },
                take: "USDT".to_string(),
                make: "BNB".to_string(),
                offset: None,
                corridor_offset_percent: None,
                min_lot_quantity: None,
                quantity_transform: None,
                source_portfolio_id: None,
                target_portfolio_id: None,
            };

            while !paper.is_exhausted().await {
                let before = paper.progress();
                let api: Arc<dyn TradeApi> = paper.clone();
                run_cycle(&pair, api, &stores, "paper").await;
                paper.take_next_request();
                if paper.progress() == before {
                    // the strategy stopped consuming data; don't spin
                    break;
                }
            }

            let orders = paper.recorded_orders().await;
            println!("\n=== Replay Result ===");
            println!("Orders placed: {}", orders.len());
            for order in &orders {
                println!(
                    "  {} {:>12} @ {:>12}  {}",
                    order.side,
                    order.quantity,
                    order.price,
                    order.time.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Config => {
            let users = load_trade_config(&cli.config)?;
            for user in &users {
                println!("\n=== User: {} ===", user.id);
                println!("APIs: {}", user.apis.keys().cloned().collect::<Vec<_>>().join(", "));
                println!("{:<12} {:<18} {:<10} {:>10}", "PAIR", "STRATEGY", "INTERVAL", "SCHEDULE");
                println!("{}", "-".repeat(54));
                for pair in &user.pairs {
                    println!(
                        "{:<12} {:<18} {:<10} {:>9}s",
                        pair.symbol(),
                        pair.strategy,
                        pair.candles.interval,
                        pair.schedule_secs.unwrap_or(60)
                    );
                }
            }
        }
    }

    Ok(())
}

/// Build the broker adapters a user's config names. Unknown adapters are
/// logged and skipped so one bad entry never takes the scheduler down.
fn build_user_apis(user: &UserConfig) -> HashMap<String, Arc<dyn TradeApi>> {
    let mut apis: HashMap<String, Arc<dyn TradeApi>> = HashMap::new();
    for (name, value) in &user.apis {
        match build_api(name, value) {
            Ok(api) => {
                apis.insert(name.clone(), api);
            }
            Err(error) => {
                error!(user = %user.id, api = %name, %error, "api not found");
            }
        }
    }
    apis
}

/// Adapter registry. Broker REST adapters register here; the tree ships the
/// paper replay broker only.
fn build_api(name: &str, config: &serde_json::Value) -> Result<Arc<dyn TradeApi>> {
    match name {
        "paper" => {
            let paper_config: PaperApiConfig = serde_json::from_value(config.clone())
                .context("invalid paper api config")?;
            let candles = load_candles(&paper_config.candles_file)?;
            Ok(Arc::new(PaperApi::new(PaperConfig {
                candles,
                min_lot: paper_config.min_lot,
                balances: paper_config.balances,
            })))
        }
        other => bail!("unknown api '{other}'"),
    }
}

fn load_candles(path: &Path) -> Result<Vec<Candle>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read candle file at {}", path.display()))?;
    serde_json::from_str(&raw).context("failed to parse candle file")
}
