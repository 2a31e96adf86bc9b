//! Exchange capabilities consumed by the trading engine.
//!
//! Everything the engine needs from the venue goes through [`ExchangeApi`] so
//! that the live Binance client, the paper-trading exchange and test doubles
//! are interchangeable.

use super::types::{NewOrder, OrderResponse};
use crate::indicators::RawKline;
use anyhow::Result;
use async_trait::async_trait;

/// REST-side operations of a spot exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Most recent `limit` candles for `symbol`, oldest first.
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u16) -> Result<Vec<RawKline>>;

    /// Place an order and return the exchange acknowledgement.
    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse>;

    /// Open a user data stream and return its listen key.
    async fn create_listen_key(&self) -> Result<String>;

    /// Extend the validity of a listen key.
    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()>;

    /// Close a user data stream.
    async fn close_listen_key(&self, listen_key: &str) -> Result<()>;
}
