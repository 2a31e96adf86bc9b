//! Configuration management for the signal trader.
//!
//! Loads settings from an optional config file and `TRADER__*` environment variables.

use crate::signal::StrategyKind;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials and endpoints
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Price and kline feed settings
    #[serde(default)]
    pub market_data: MarketDataConfig,
    /// User data stream settings
    #[serde(default)]
    pub orders: OrderStreamConfig,
    /// SQLite database location
    #[serde(default)]
    pub database: DatabaseConfig,
    /// One entry per strategy instance
    #[serde(default)]
    pub traders: Vec<TraderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// REST endpoint for market data
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WebSocket endpoint for market streams
    #[serde(default = "default_websocket_base_url")]
    pub websocket_base_url: String,
    /// REST endpoint for orders and listen keys
    #[serde(default = "default_base_url")]
    pub trade_base_url: String,
    /// WebSocket endpoint for the user data stream
    #[serde(default = "default_websocket_base_url")]
    pub trade_websocket_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Candle interval requested from `/api/v3/klines`
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,
    /// Number of candles per poll (max 1000)
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u16,
    #[serde(default = "default_kline_poll_secs")]
    pub kline_poll_secs: u64,
    /// Delay before reconnecting a dropped trade stream
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Capacity of every consumer queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStreamConfig {
    /// Listen keys expire after 60 minutes unless renewed
    #[serde(default = "default_listen_key_renew_secs")]
    pub listen_key_renew_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// A single strategy instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderConfig {
    pub symbol: String,
    pub strategy: StrategyKind,
    /// Quote-asset capital allocated to this trader
    pub capital: Decimal,
    /// Base-asset quantity per order
    pub trade_quantity: Decimal,
    /// Price distance between grid levels (grid only)
    #[serde(default)]
    pub grid_gap: Option<Decimal>,
    /// Maximum concurrent positions; defaults per strategy
    #[serde(default)]
    pub max_slots: Option<u32>,
    /// Candle interval for this trader's detector; defaults to `market_data.kline_interval`
    #[serde(default)]
    pub kline_interval: Option<String>,
}

impl TraderConfig {
    /// Configured slot count or the strategy default.
    pub fn slots(&self) -> u32 {
        self.max_slots
            .unwrap_or_else(|| self.strategy.default_max_slots())
    }

    /// Configured candle interval or `default`.
    pub fn kline_interval<'a>(&'a self, default: &'a str) -> &'a str {
        self.kline_interval.as_deref().unwrap_or(default)
    }
}

/// Candle intervals accepted by the klines endpoint.
pub const KLINE_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

// Default value functions
fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_websocket_base_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_kline_interval() -> String {
    "1m".to_string()
}

fn default_kline_limit() -> u16 {
    1000
}

fn default_kline_poll_secs() -> u64 {
    60
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_listen_key_renew_secs() -> u64 {
    30 * 60
}

fn default_database_path() -> String {
    "data/signal_trader.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and an optional config file.
    ///
    /// `path` overrides the default `config` file stem.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path.unwrap_or("config")).required(path.is_some()))
            .add_source(config::Environment::default().separator("__").prefix("TRADER"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.market_data.kline_limit > 0 && self.market_data.kline_limit <= 1000,
            "kline_limit must be between 1 and 1000"
        );

        anyhow::ensure!(
            KLINE_INTERVALS.contains(&self.market_data.kline_interval.as_str()),
            "unsupported kline_interval {:?}",
            self.market_data.kline_interval
        );

        anyhow::ensure!(
            self.market_data.kline_poll_secs > 0,
            "kline_poll_secs must be positive"
        );

        anyhow::ensure!(
            self.market_data.queue_capacity > 0,
            "queue_capacity must be positive"
        );

        anyhow::ensure!(
            self.orders.listen_key_renew_secs > 0 && self.orders.listen_key_renew_secs < 3600,
            "listen_key_renew_secs must be below the 60 minute listen key lifetime"
        );

        let mut seen = HashSet::new();
        for trader in &self.traders {
            anyhow::ensure!(!trader.symbol.is_empty(), "trader symbol must not be empty");
            anyhow::ensure!(
                seen.insert((trader.symbol.clone(), trader.strategy)),
                "duplicate trader for {} {}",
                trader.symbol,
                trader.strategy
            );
            anyhow::ensure!(
                trader.capital > Decimal::ZERO,
                "{} capital must be positive",
                trader.symbol
            );
            anyhow::ensure!(
                trader.trade_quantity > Decimal::ZERO,
                "{} trade_quantity must be positive",
                trader.symbol
            );
            anyhow::ensure!(trader.slots() > 0, "{} max_slots must be positive", trader.symbol);
            let interval = trader.kline_interval(&self.market_data.kline_interval);
            anyhow::ensure!(
                KLINE_INTERVALS.contains(&interval),
                "{} unsupported kline_interval {interval:?}",
                trader.symbol
            );

            if trader.strategy == StrategyKind::Grid {
                anyhow::ensure!(
                    trader.grid_gap.is_some_and(|gap| gap > Decimal::ZERO),
                    "{} grid trader needs a positive grid_gap",
                    trader.symbol
                );
            }
        }

        Ok(())
    }

    /// True when every REST endpoint that needs credentials has them.
    pub fn has_credentials(&self) -> bool {
        !self.binance.api_key.is_empty() && !self.binance.secret_key.is_empty()
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            base_url: default_base_url(),
            websocket_base_url: default_websocket_base_url(),
            trade_base_url: default_base_url(),
            trade_websocket_base_url: default_websocket_base_url(),
        }
    }
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            kline_interval: default_kline_interval(),
            kline_limit: default_kline_limit(),
            kline_poll_secs: default_kline_poll_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for OrderStreamConfig {
    fn default() -> Self {
        Self {
            listen_key_renew_secs: default_listen_key_renew_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}
