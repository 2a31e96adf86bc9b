//! Kline rows as delivered by `GET /api/v3/klines`.
//!
//! Each row is a heterogeneous JSON array:
//! `[openTime, open, high, low, close, volume, closeTime, quoteVol, trades,
//!   takerBaseVol, takerQuoteVol, ignore]` with prices encoded as strings.

use super::IndicatorError;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// One raw kline row, kept untyped until a detector needs it.
pub type RawKline = Vec<Value>;

/// Parsed OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

impl Candle {
    /// Parse a single kline row.
    pub fn from_row(index: usize, row: &[Value]) -> Result<Self, IndicatorError> {
        if row.len() < 7 {
            return Err(IndicatorError::MalformedCandle {
                index,
                reason: format!("expected at least 7 fields, got {}", row.len()),
            });
        }

        Ok(Self {
            open_time: integer_field(index, row, 0)?,
            open: decimal_field(index, row, 1)?,
            high: decimal_field(index, row, 2)?,
            low: decimal_field(index, row, 3)?,
            close: decimal_field(index, row, 4)?,
            volume: decimal_field(index, row, 5)?,
            close_time: integer_field(index, row, 6)?,
        })
    }
}

/// Parse a whole batch, failing on the first malformed row.
pub fn parse_candles(rows: &[RawKline]) -> Result<Vec<Candle>, IndicatorError> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| Candle::from_row(index, row))
        .collect()
}

fn decimal_field(index: usize, row: &[Value], field: usize) -> Result<Decimal, IndicatorError> {
    let parsed = match &row[field] {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| IndicatorError::MalformedCandle {
        index,
        reason: format!("field {field} is not a decimal: {}", row[field]),
    })
}

fn integer_field(index: usize, row: &[Value], field: usize) -> Result<i64, IndicatorError> {
    row[field]
        .as_i64()
        .ok_or_else(|| IndicatorError::MalformedCandle {
            index,
            reason: format!("field {field} is not an integer: {}", row[field]),
        })
}
