//! Binance spot connectivity.
//!
//! - REST client for klines, limit orders and listen key management
//! - WebSocket sessions for trade ticks and the user data stream
//! - A paper exchange that fills orders locally

mod client;
mod paper;
mod traits;
mod types;
pub mod websocket;

pub use client::BinanceClient;
pub use paper::{PaperExchange, DEFAULT_PAPER_FEE_RATE};
pub use traits::ExchangeApi;
#[cfg(test)]
pub use traits::MockExchangeApi;
pub use types::*;
