//! Bollinger bands over closing prices.

use super::IndicatorError;
use crate::utils::decimal::mean;
use rust_decimal::{Decimal, MathematicalOps};

/// Rolling window used by the mean-reversion detector.
pub const DEFAULT_WINDOW: usize = 20;

/// Band width in standard deviations.
pub const DEFAULT_NUM_STD: Decimal = Decimal::TWO;

/// Envelope computed over the most recent `window` closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BollingerBands {
    /// Simple moving average (middle band)
    pub middle: Decimal,
    /// `middle + k * std_dev`
    pub upper: Decimal,
    /// `middle - k * std_dev`
    pub lower: Decimal,
    /// Sample standard deviation of the window
    pub std_dev: Decimal,
}

/// Where a price sits relative to the bands, when it matters for trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandCrossing {
    /// Strictly below the lower band: oversold
    BelowLower,
    /// Strictly above the moving average: reverted to (or past) the mean
    AboveMiddle,
}

impl BollingerBands {
    /// Classify `price` against the bands. Prices between the lower band and
    /// the moving average (inclusive) yield `None`.
    pub fn crossing(&self, price: Decimal) -> Option<BandCrossing> {
        if price < self.lower {
            Some(BandCrossing::BelowLower)
        } else if price > self.middle {
            Some(BandCrossing::AboveMiddle)
        } else {
            None
        }
    }
}

/// Compute bands from the last `window` values of `closes` (oldest first).
///
/// The standard deviation uses the sample estimator (n - 1), matching the
/// conventional rolling-window definition.
pub fn bollinger_bands(
    closes: &[Decimal],
    window: usize,
    num_std: Decimal,
) -> Result<BollingerBands, IndicatorError> {
    if window < 2 || closes.len() < window {
        return Err(IndicatorError::InsufficientHistory {
            required: window.max(2),
            available: closes.len(),
        });
    }

    let recent = &closes[closes.len() - window..];
    let middle = mean(recent).ok_or(IndicatorError::Numeric("empty window"))?;

    let squared: Decimal = recent
        .iter()
        .map(|close| {
            let diff = *close - middle;
            diff * diff
        })
        .sum();
    let variance = squared / Decimal::from(window - 1);
    let std_dev = variance
        .sqrt()
        .ok_or(IndicatorError::Numeric("negative variance"))?;

    Ok(BollingerBands {
        middle,
        upper: middle + std_dev * num_std,
        lower: middle - std_dev * num_std,
        std_dev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(head: Decimal, count: usize, last: Decimal) -> Vec<Decimal> {
        let mut closes = vec![head; count];
        closes.push(last);
        closes
    }

    #[test]
    fn test_flat_series_has_zero_width() {
        let closes = vec![dec!(100); 20];
        let bands = bollinger_bands(&closes, DEFAULT_WINDOW, DEFAULT_NUM_STD).unwrap();
        assert_eq!(bands.middle, dec!(100));
        assert_eq!(bands.std_dev, Decimal::ZERO);
        assert_eq!(bands.lower, bands.upper);
    }

    #[test]
    fn test_only_last_window_is_used() {
        // 30 old candles at 10 must not influence a window of 20 candles at 50
        let mut closes = vec![dec!(10); 30];
        closes.extend(vec![dec!(50); 20]);
        let bands = bollinger_bands(&closes, DEFAULT_WINDOW, DEFAULT_NUM_STD).unwrap();
        assert_eq!(bands.middle, dec!(50));
    }

    #[test]
    fn test_sample_standard_deviation() {
        // 19 x 100 then 80: mean 99, squared deviations 19*1 + 361 = 380, /19 = 20
        let closes = series(dec!(100), 19, dec!(80));
        let bands = bollinger_bands(&closes, DEFAULT_WINDOW, DEFAULT_NUM_STD).unwrap();
        assert_eq!(bands.middle, dec!(99));
        let expected_std = dec!(20).sqrt().unwrap();
        assert_eq!(bands.std_dev, expected_std);
        assert_eq!(bands.lower, dec!(99) - expected_std * dec!(2));
    }

    #[test]
    fn test_last_close_below_lower_band() {
        let closes = series(dec!(100), 19, dec!(80));
        let bands = bollinger_bands(&closes, DEFAULT_WINDOW, DEFAULT_NUM_STD).unwrap();
        assert_eq!(bands.crossing(dec!(80)), Some(BandCrossing::BelowLower));
    }

    #[test]
    fn test_last_close_above_middle() {
        let closes = series(dec!(100), 19, dec!(101));
        let bands = bollinger_bands(&closes, DEFAULT_WINDOW, DEFAULT_NUM_STD).unwrap();
        assert_eq!(bands.crossing(dec!(101)), Some(BandCrossing::AboveMiddle));
    }

    #[test]
    fn test_last_close_between_bands() {
        // mean 100.925, std ~1.03: 100.5 sits between lower band and mean
        let mut closes = vec![dec!(100); 10];
        closes.extend(vec![dec!(102); 9]);
        closes.push(dec!(100.5));
        let bands = bollinger_bands(&closes, DEFAULT_WINDOW, DEFAULT_NUM_STD).unwrap();
        assert!(bands.lower < dec!(100.5));
        assert_eq!(bands.crossing(dec!(100.5)), None);
    }

    #[test]
    fn test_insufficient_history() {
        let closes = vec![dec!(1); 19];
        let err = bollinger_bands(&closes, DEFAULT_WINDOW, DEFAULT_NUM_STD).unwrap_err();
        assert_eq!(
            err,
            IndicatorError::InsufficientHistory {
                required: 20,
                available: 19
            }
        );
    }
}
