mod config;
mod engine;
mod error;
mod exchange;
mod overlay;
mod render;
mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::ChartConfig;
use engine::{ChartEngine, EngineState};
use exchange::{BinanceClient, BinanceKlineFeed};
use overlay::{compute_line_decorations, compute_trade_decorations};
use render::{initialize_surface, HeadlessFactory, LogicalRange, RetryPolicy};
use types::{Interval, OrderRecord, Symbol};

#[derive(Parser)]
#[command(name = "chart-sync")]
#[command(version = "0.1.0")]
#[command(about = "Price chart sync engine: history, live klines, backfill and order overlays", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "chart.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page of klines and print them as JSON lines
    History {
        /// Symbol, e.g. XRPUSDT (default from config)
        #[arg(short, long)]
        symbol: Option<Symbol>,
        /// Interval: 1m, 3m, 5m, 15m, 1h, 4h, 1d (default from config)
        #[arg(short, long)]
        interval: Option<Interval>,
        /// Newest open time to include, epoch milliseconds
        #[arg(short, long)]
        end_time: Option<i64>,
        /// Page size (max 1000)
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Print the trade and line decorations for an order list
    Decorate {
        /// JSON file holding an array of orders
        #[arg(short, long)]
        orders: PathBuf,
    },
    /// Run the chart engine against the live exchange on a headless surface
    Watch {
        #[arg(short, long)]
        symbol: Option<Symbol>,
        #[arg(short, long)]
        interval: Option<Interval>,
        /// Order list to overlay
        #[arg(short, long)]
        orders: Option<PathBuf>,
        /// Scroll to the left edge this many times to load older pages
        #[arg(short, long, default_value = "0")]
        backfill_pages: u32,
        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(long)]
        seconds: Option<u64>,
        /// Seconds between status reports
        #[arg(long, default_value = "10")]
        status_every: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ChartConfig::load(&cli.config)?;

    match cli.command {
        Commands::History {
            symbol,
            interval,
            end_time,
            limit,
        } => {
            let symbol = symbol.unwrap_or_else(|| config.defaults.symbol.clone());
            let interval = interval.unwrap_or(config.defaults.interval);
            let limit = limit.unwrap_or(config.history.page_size);
            show_history(&config, &symbol, interval, end_time, limit).await?;
        }
        Commands::Decorate { orders } => {
            show_decorations(&orders)?;
        }
        Commands::Watch {
            symbol,
            interval,
            orders,
            backfill_pages,
            seconds,
            status_every,
        } => {
            let mut config = config;
            if let Some(symbol) = symbol {
                config.defaults.symbol = symbol;
            }
            if let Some(interval) = interval {
                config.defaults.interval = interval;
            }
            let orders = match orders {
                Some(path) => Some(read_orders(&path)?),
                None => None,
            };
            run_watch(config, orders, backfill_pages, seconds, status_every).await?;
        }
    }

    Ok(())
}

async fn show_history(
    config: &ChartConfig,
    symbol: &Symbol,
    interval: Interval,
    end_time: Option<i64>,
    limit: u32,
) -> Result<()> {
    let client = BinanceClient::new(&config.endpoints.rest_base_url, limit);
    let candles = client.get_candles(symbol, interval, end_time).await?;

    for candle in &candles {
        println!("{}", serde_json::to_string(candle)?);
    }
    info!("{} {}: {} candles", symbol, interval, candles.len());
    Ok(())
}

fn read_orders(path: &Path) -> Result<Vec<OrderRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading orders from {}", path.display()))?;
    let orders: Vec<OrderRecord> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of orders", path.display()))?;
    Ok(orders)
}

fn show_decorations(path: &Path) -> Result<()> {
    let orders = read_orders(path)?;
    let trades = compute_trade_decorations(&orders);
    let lines = compute_line_decorations(&orders);

    let output = serde_json::json!({ "trades": trades, "lines": lines });
    println!("{}", serde_json::to_string_pretty(&output)?);
    info!(
        "{} orders -> {} trade decorations, {} line decorations",
        orders.len(),
        trades.len(),
        lines.len()
    );
    Ok(())
}

async fn run_watch(
    config: ChartConfig,
    orders: Option<Vec<OrderRecord>>,
    mut backfill_pages: u32,
    seconds: Option<u64>,
    status_every: u64,
) -> Result<()> {
    let mut factory = HeadlessFactory::new();
    let prepared = initialize_surface(&mut factory, RetryPolicy::from_settings(&config.render)).await?;

    let source = Arc::new(BinanceClient::from_config(&config));
    let feed = Arc::new(BinanceKlineFeed::from_config(&config));
    let mut engine = ChartEngine::new(source, feed, prepared, config);

    if let Some(orders) = orders {
        engine.handle().set_orders(orders);
    }

    info!("Watching {}", engine.context());
    info!("Press Ctrl+C to stop");
    engine.start();

    let mut status_tick = tokio::time::interval(Duration::from_secs(status_every.max(1)));
    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(event) = engine.next_event() => {
                engine.handle_event(event);

                if backfill_pages > 0 && engine.state() == EngineState::Live && !engine.buffer().is_placeholder() {
                    let to = engine.buffer().len() as f64;
                    engine.on_visible_range_change(LogicalRange { from: 0.0, to });
                    if engine.state() != EngineState::Live {
                        backfill_pages -= 1;
                    }
                }
            }
            _ = status_tick.tick() => {
                let status = engine.status();
                if status.is_unavailable() {
                    warn!("{} {} unavailable: {}", status.symbol, status.interval,
                        status.error.as_deref().unwrap_or("no data"));
                }
                info!("{}", serde_json::to_string(&status)?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            _ = &mut deadline => {
                info!("Time limit reached");
                break;
            }
        }
    }

    engine.teardown();
    println!("{}", serde_json::to_string_pretty(&engine.status())?);
    Ok(())
}
