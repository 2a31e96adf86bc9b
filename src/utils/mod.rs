//! Shared utilities: decimal arithmetic and date formatting.

pub mod decimal;
pub mod time;
