//! Signal Trader - Main Entry Point

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use signal_trader::config::Config;
use signal_trader::exchange::{BinanceClient, ExchangeApi, PaperExchange, DEFAULT_PAPER_FEE_RATE};
use signal_trader::market::QUEUE_CAPACITY;
use signal_trader::orchestrator::{OrderSource, Orchestrator};
use signal_trader::persistence::{SqliteStore, TradeStore};
use signal_trader::trader::TradeStatus;
use signal_trader::utils::decimal::round_to_precision;
use signal_trader::utils::time::duration_label;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Signal Trader CLI
#[derive(Parser)]
#[command(name = "signal-trader")]
#[command(version, about = "Signal-driven spot trading on Binance")]
struct Cli {
    /// Configuration file (without extension resolves config.toml, config.yaml, ...)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Simulate order fills locally instead of trading
    #[arg(long)]
    paper: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show persisted traders and their open trades
    Status {
        /// Path to SQLite database (default: database.path from config)
        #[arg(short, long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load(cli.config.as_deref())?;

    if let Some(Commands::Status { db }) = cli.command {
        let db_path = db.unwrap_or_else(|| config.database.path.clone());
        return show_status(&db_path);
    }

    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        traders = config.traders.len(),
        paper = cli.paper,
        "Signal Trader starting"
    );
    log_config(&config);

    if !cli.paper && !config.has_credentials() {
        warn!("No API credentials configured, order placement will fail");
    }

    if let Some(dir) = Path::new(&config.database.path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create database directory {dir:?}"))?;
        }
    }
    let store: Arc<dyn TradeStore> = Arc::new(SqliteStore::open(&config.database.path)?);

    let client: Arc<dyn ExchangeApi> = Arc::new(BinanceClient::new(&config.binance)?);
    let (exchange, order_source): (Arc<dyn ExchangeApi>, OrderSource) = if cli.paper {
        info!("Paper trading: orders are filled locally at their limit price");
        let (fills_tx, fills_rx) = mpsc::channel(QUEUE_CAPACITY);
        let paper = PaperExchange::new(DEFAULT_PAPER_FEE_RATE)
            .with_market_data(client)
            .with_fill_reports(fills_tx);
        (Arc::new(paper), OrderSource::Local(fills_rx))
    } else {
        (client, OrderSource::UserDataStream)
    };

    let (shutdown_tx, shutdown) = signal_trader::shutdown::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let running = Orchestrator::build(&config, exchange, store).start(order_source, shutdown);
    info!(tasks = running.task_count(), "Running, press Ctrl-C to stop");

    let traders = running.traders().to_vec();
    running.join_all().await;

    for trader in traders {
        let trader = trader.lock().await;
        let account = trader.account();
        info!(
            trader_id = %trader.id(),
            symbol = %trader.config().symbol,
            strategy = %trader.config().strategy,
            capital = %account.capital,
            profit = %account.profit,
            open_trades = trader.current_trades().len(),
            "Final trader state"
        );
    }

    info!("Signal Trader shutdown complete");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file under `logs/`.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "signal-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes on drop; keep it for the whole process.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("signal_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!(
        base_url = %config.binance.base_url,
        trade_base_url = %config.binance.trade_base_url,
        kline_interval = %config.market_data.kline_interval,
        kline_limit = config.market_data.kline_limit,
        database = %config.database.path,
        "Configuration loaded"
    );
    for trader in &config.traders {
        info!(
            symbol = %trader.symbol,
            strategy = %trader.strategy,
            capital = %trader.capital,
            trade_quantity = %trader.trade_quantity,
            slots = trader.slots(),
            kline_interval = trader.kline_interval(&config.market_data.kline_interval),
            "Trader configured"
        );
    }
}

/// Print persisted traders and their open trades.
fn show_status(db_path: &str) -> Result<()> {
    println!("=== SIGNAL TRADER STATUS ===");

    if !Path::new(db_path).exists() {
        println!("\nDatabase not found: {db_path}");
        println!("   The daemon has not run yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = SqliteStore::open(db_path)?;
    let traders = store.load_all_traders()?;
    if traders.is_empty() {
        println!("\nNo traders saved yet.");
        return Ok(());
    }

    let now = Utc::now();
    for record in &traders {
        println!("\n{} [{}] {}", record.symbol, record.strategy, record.id);
        println!("   ├─ Initial Capital:  {:.2}", record.initial_capital);
        println!("   ├─ Capital:          {:.2}", record.capital);
        println!("   ├─ Reserved:         {:.2}", record.total_reserved_amount);
        println!(
            "   ├─ Profit:           {:.4} ({}%)",
            record.profit,
            round_to_precision(record.progress_percentage(), 2)
        );
        println!("   ├─ Fees:             {:.4}", record.total_fees);
        println!("   └─ Slots:            {}/{} free", record.free_slots, record.max_slots);

        let open = store.load_trades_by_trader(&record.id, Some(TradeStatus::Closed))?;
        for trade in &open {
            println!(
                "       {} {} qty {} @ {} (buy #{}, open {})",
                trade.status,
                trade.id,
                trade.quantity,
                trade.buy_price.unwrap_or(trade.detected_price),
                trade.buy_order_id,
                duration_label(trade.open_date, now)
            );
        }
    }

    println!();
    Ok(())
}
