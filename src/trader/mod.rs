//! Trade lifecycle engine.
//!
//! - `trade`: per-trade state machine
//! - `engine`: capital bookkeeping, order placement and execution reports
//! - `reverse_mean` / `grid`: strategy policies
//! - `worker`: price, signal and order loops around one trader

mod engine;
mod grid;
mod reverse_mean;
mod trade;
mod worker;

pub use engine::{Policy, ReportOutcome, Trader, TraderAccount, TraderError};
pub use grid::{GridAction, GridBook, GridCell};
pub use trade::{BuyFill, SaleFill, Settlement, Trade, TradeError, TradeLeg, TradeStatus, SALE_FEE_RATE};
pub use worker::TraderWorker;
