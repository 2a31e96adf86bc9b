//! Market data hub.
//!
//! Turns the exchange trade stream and kline REST endpoint into bounded
//! per-consumer queues. Producers never block: a full queue drops the
//! update for that consumer only.

mod fanout;
mod hub;
mod kline_feed;
mod price_feed;

pub use fanout::{Delivery, Fanout};
pub use hub::{MarketDataHub, MarketSettings};
pub use kline_feed::KlineFeed;
pub use price_feed::PriceFeed;

use crate::indicators::{parse_candles, Candle, IndicatorError, RawKline};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Default capacity of every consumer queue.
pub const QUEUE_CAPACITY: usize = 1000;

/// A distinct last-trade price for a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub symbol: Arc<str>,
    pub price: Decimal,
}

/// One kline poll, most recent candle last.
#[derive(Debug, Clone)]
pub struct KlineBatch {
    pub symbol: Arc<str>,
    pub interval: Arc<str>,
    /// Shared between every consumer of the same poll
    pub rows: Arc<Vec<RawKline>>,
}

impl KlineBatch {
    pub fn candles(&self) -> Result<Vec<Candle>, IndicatorError> {
        parse_candles(&self.rows)
    }
}
