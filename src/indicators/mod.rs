//! Pure indicator math over candle series.
//!
//! Nothing in here performs I/O or holds state between calls:
//! - `candle`: parsing of exchange kline rows
//! - `bollinger`: moving average / standard deviation envelope
//! - `grid`: price envelope and grid ladder construction

mod bollinger;
mod candle;
mod grid;

pub use bollinger::{bollinger_bands, BandCrossing, BollingerBands, DEFAULT_NUM_STD, DEFAULT_WINDOW};
pub use candle::{parse_candles, Candle, RawKline};
pub use grid::{grid_levels, price_envelope, GridLevel, PriceEnvelope, MAX_GRID_LEVELS};

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by indicator computations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    #[error("insufficient history: need {required} candles, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("malformed candle at index {index}: {reason}")]
    MalformedCandle { index: usize, reason: String },

    #[error("grid gap must be positive, got {0}")]
    InvalidGap(Decimal),

    #[error("invalid price range [{min}, {max}]")]
    InvalidRange { min: Decimal, max: Decimal },

    #[error("grid ladder would exceed {max} levels")]
    TooManyLevels { max: usize },

    #[error("numeric failure: {0}")]
    Numeric(&'static str),
}
