//! Registry of price and kline feeds.

use super::{KlineBatch, KlineFeed, PriceFeed, PriceUpdate};
use crate::config::{BinanceConfig, MarketDataConfig};
use crate::exchange::ExchangeApi;
use crate::shutdown::ShutdownSignal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Feed parameters shared by every worker the hub starts.
#[derive(Debug, Clone)]
pub struct MarketSettings {
    pub ws_base_url: String,
    pub kline_limit: u16,
    pub kline_poll: Duration,
    pub reconnect_delay: Duration,
}

impl MarketSettings {
    pub fn from_config(binance: &BinanceConfig, market: &MarketDataConfig) -> Self {
        Self {
            ws_base_url: binance.websocket_base_url.clone(),
            kline_limit: market.kline_limit,
            kline_poll: Duration::from_secs(market.kline_poll_secs),
            reconnect_delay: Duration::from_secs(market.reconnect_delay_secs),
        }
    }
}

/// One price worker per symbol and one kline worker per (symbol, interval),
/// created on first subscription.
///
/// Subscriptions are only possible before [`MarketDataHub::start`] consumes the hub.
pub struct MarketDataHub {
    settings: MarketSettings,
    price_feeds: BTreeMap<String, PriceFeed>,
    kline_feeds: BTreeMap<(String, String), KlineFeed>,
}

impl MarketDataHub {
    pub fn new(settings: MarketSettings) -> Self {
        Self {
            settings,
            price_feeds: BTreeMap::new(),
            kline_feeds: BTreeMap::new(),
        }
    }

    pub fn subscribe_price(&mut self, symbol: &str, sender: mpsc::Sender<PriceUpdate>) {
        let settings = &self.settings;
        self.price_feeds
            .entry(symbol.to_string())
            .or_insert_with(|| PriceFeed::new(symbol, &settings.ws_base_url, settings.reconnect_delay))
            .add_consumer(sender);
    }

    pub fn subscribe_klines(&mut self, symbol: &str, interval: &str, sender: mpsc::Sender<KlineBatch>) {
        let settings = &self.settings;
        self.kline_feeds
            .entry((symbol.to_string(), interval.to_string()))
            .or_insert_with(|| KlineFeed::new(symbol, interval, settings.kline_limit, settings.kline_poll))
            .add_consumer(sender);
    }

    pub fn price_symbols(&self) -> Vec<&str> {
        self.price_feeds.keys().map(String::as_str).collect()
    }

    pub fn kline_streams(&self) -> Vec<(&str, &str)> {
        self.kline_feeds
            .keys()
            .map(|(symbol, interval)| (symbol.as_str(), interval.as_str()))
            .collect()
    }

    /// Spawn every feed worker.
    pub fn start(self, exchange: Arc<dyn ExchangeApi>, shutdown: ShutdownSignal) -> Vec<JoinHandle<()>> {
        info!(
            price_feeds = self.price_feeds.len(),
            kline_feeds = self.kline_feeds.len(),
            "Starting market data hub"
        );

        let mut handles = Vec::with_capacity(self.price_feeds.len() + self.kline_feeds.len());

        for feed in self.price_feeds.into_values() {
            handles.push(tokio::spawn(feed.run(shutdown.clone())));
        }

        for feed in self.kline_feeds.into_values() {
            handles.push(tokio::spawn(feed.run(exchange.clone(), shutdown.clone())));
        }

        handles
    }
}
