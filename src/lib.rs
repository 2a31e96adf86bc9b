//! # Signal Trader
//!
//! An automated Binance spot trading daemon driven by market signals.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `exchange`: Binance API client (REST + WebSocket) and paper exchange
//! - `indicators`: Candle parsing, Bollinger bands and grid ladders
//! - `market`: Price and kline feeds with bounded fan-out
//! - `signal`: Reverse-mean and grid signal detectors
//! - `trader`: Trade lifecycle, capital bookkeeping and strategy policies
//! - `orders`: User data stream and execution report fan-out
//! - `orchestrator`: Queue topology and worker startup
//! - `persistence`: SQLite storage of traders and trades
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod exchange;
pub mod indicators;
pub mod market;
pub mod orchestrator;
pub mod orders;
pub mod persistence;
pub mod shutdown;
pub mod signal;
pub mod trader;
pub mod utils;

pub use config::Config;
