//! Per-symbol trade stream worker.

use super::{Delivery, Fanout, PriceUpdate};
use crate::exchange::websocket::{parse_trade_tick, run_session, trade_stream_url, SessionEnd};
use crate::shutdown::{wait_for_shutdown, ShutdownSignal};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Streams trades for one symbol and publishes each distinct price.
pub struct PriceFeed {
    symbol: Arc<str>,
    ws_base_url: String,
    reconnect_delay: Duration,
    consumers: Fanout<PriceUpdate>,
    last_price: Option<Decimal>,
}

impl PriceFeed {
    pub fn new(symbol: &str, ws_base_url: &str, reconnect_delay: Duration) -> Self {
        Self {
            symbol: Arc::from(symbol),
            ws_base_url: ws_base_url.to_string(),
            reconnect_delay,
            consumers: Fanout::new(format!("price:{symbol}")),
            last_price: None,
        }
    }

    pub fn add_consumer(&mut self, sender: mpsc::Sender<PriceUpdate>) {
        self.consumers.add_consumer(sender);
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Publish `price` unless it equals the last published one.
    pub fn publish(&mut self, price: Decimal) -> Option<Delivery> {
        if self.last_price == Some(price) {
            return None;
        }
        self.last_price = Some(price);

        let update = PriceUpdate {
            symbol: self.symbol.clone(),
            price,
        };
        Some(self.consumers.publish(&update))
    }

    fn on_message(&mut self, text: &str) {
        match parse_trade_tick(text) {
            Ok(tick) if *tick.symbol == *self.symbol => {
                self.publish(tick.price);
            }
            Ok(tick) => debug!(symbol = %self.symbol, other = %tick.symbol, "Ignoring tick for another symbol"),
            Err(e) => warn!(symbol = %self.symbol, error = %e, "Discarding malformed trade message"),
        }
    }

    /// Stream until shutdown, reconnecting after a fixed delay on any drop.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        let url = trade_stream_url(&self.ws_base_url, &self.symbol);
        info!(symbol = %self.symbol, consumers = self.consumers.len(), "Price feed started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let stop = wait_for_shutdown(shutdown.clone());
            match run_session(&url, stop, |text| self.on_message(text)).await {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::ClosedByServer) => {
                    warn!(symbol = %self.symbol, "Trade stream closed, reconnecting")
                }
                Err(e) => warn!(symbol = %self.symbol, error = %e, "Trade stream failed, reconnecting"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = wait_for_shutdown(shutdown.clone()) => break,
            }
        }

        info!(symbol = %self.symbol, "Price feed stopped");
    }
}
