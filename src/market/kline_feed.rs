//! Periodic kline poller.

use super::{Delivery, Fanout, KlineBatch};
use crate::exchange::ExchangeApi;
use crate::shutdown::{wait_for_shutdown, ShutdownSignal};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Polls `/api/v3/klines` for one (symbol, interval) and publishes each batch.
pub struct KlineFeed {
    symbol: Arc<str>,
    interval: Arc<str>,
    limit: u16,
    poll_every: Duration,
    consumers: Fanout<KlineBatch>,
}

impl KlineFeed {
    pub fn new(symbol: &str, interval: &str, limit: u16, poll_every: Duration) -> Self {
        Self {
            symbol: Arc::from(symbol),
            interval: Arc::from(interval),
            limit,
            poll_every,
            consumers: Fanout::new(format!("klines:{symbol}:{interval}")),
        }
    }

    pub fn add_consumer(&mut self, sender: mpsc::Sender<KlineBatch>) {
        self.consumers.add_consumer(sender);
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Fetch one batch and offer it to every consumer.
    pub async fn poll_once(&self, exchange: &dyn ExchangeApi) -> Result<Delivery> {
        let rows = exchange
            .get_klines(&self.symbol, &self.interval, self.limit)
            .await?;

        debug!(symbol = %self.symbol, candles = rows.len(), "Fetched klines");

        let batch = KlineBatch {
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            rows: Arc::new(rows),
        };
        Ok(self.consumers.publish(&batch))
    }

    /// Poll immediately, then once per period until shutdown.
    /// A failed poll is logged and retried on the next tick.
    pub async fn run(self, exchange: Arc<dyn ExchangeApi>, shutdown: ShutdownSignal) {
        info!(symbol = %self.symbol, interval = %self.interval, "Kline feed started");

        let mut ticker = tokio::time::interval(self.poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(exchange.as_ref()).await {
                        warn!(symbol = %self.symbol, error = %e, "Kline poll failed");
                    }
                }
                _ = wait_for_shutdown(shutdown.clone()) => break,
            }
        }

        info!(symbol = %self.symbol, "Kline feed stopped");
    }
}
