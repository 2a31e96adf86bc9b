//! Price envelope and grid ladder construction.

use super::{Candle, IndicatorError};
use rust_decimal::Decimal;

/// Upper bound on the number of rungs one ladder may hold.
pub const MAX_GRID_LEVELS: usize = 1000;

/// Extreme low/high observed across a candle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceEnvelope {
    pub min_price: Decimal,
    pub max_price: Decimal,
}

impl PriceEnvelope {
    /// Whether `price` lies strictly outside the envelope.
    pub fn is_outside(&self, price: Decimal) -> bool {
        price < self.min_price || price > self.max_price
    }

    /// Whether `other` extends this envelope on either side.
    pub fn is_widened_by(&self, other: &PriceEnvelope) -> bool {
        other.min_price < self.min_price || other.max_price > self.max_price
    }
}

/// One rung of the grid ladder: `[start, end]` with `start = end - gap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLevel {
    pub start: Decimal,
    pub end: Decimal,
}

impl GridLevel {
    pub fn contains(&self, price: Decimal) -> bool {
        self.start <= price && price <= self.end
    }
}

/// Lowest low and highest high over all candles.
pub fn price_envelope(candles: &[Candle]) -> Result<PriceEnvelope, IndicatorError> {
    let first = candles.first().ok_or(IndicatorError::InsufficientHistory {
        required: 1,
        available: 0,
    })?;

    let envelope = candles.iter().fold(
        PriceEnvelope {
            min_price: first.low,
            max_price: first.high,
        },
        |acc, candle| PriceEnvelope {
            min_price: acc.min_price.min(candle.low),
            max_price: acc.max_price.max(candle.high),
        },
    );

    Ok(envelope)
}

/// Walk down from `max_price` in steps of `gap`, one level per step, until
/// the running top reaches `min_price`. Levels are returned highest first.
/// Fails when the range would need more than [`MAX_GRID_LEVELS`] levels.
pub fn grid_levels(
    min_price: Decimal,
    max_price: Decimal,
    gap: Decimal,
) -> Result<Vec<GridLevel>, IndicatorError> {
    if gap <= Decimal::ZERO {
        return Err(IndicatorError::InvalidGap(gap));
    }
    if min_price > max_price {
        return Err(IndicatorError::InvalidRange {
            min: min_price,
            max: max_price,
        });
    }

    let steps = max_price
        .checked_sub(min_price)
        .and_then(|span| span.checked_div(gap))
        .map(|steps| steps.ceil());
    match steps {
        Some(steps) if steps <= Decimal::from(MAX_GRID_LEVELS) => {}
        _ => return Err(IndicatorError::TooManyLevels { max: MAX_GRID_LEVELS }),
    }

    let mut levels = Vec::new();
    let mut top = max_price;
    while top > min_price {
        levels.push(GridLevel {
            start: top - gap,
            end: top,
        });
        top -= gap;
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(low: Decimal, high: Decimal) -> Candle {
        Candle {
            open_time: 0,
            open: low,
            high,
            low,
            close: high,
            volume: Decimal::ONE,
            close_time: 0,
        }
    }

    #[test]
    fn test_ladder_coverage() {
        let levels = grid_levels(dec!(90), dec!(130), dec!(10)).unwrap();
        let bounds: Vec<(Decimal, Decimal)> = levels.iter().map(|l| (l.start, l.end)).collect();
        assert_eq!(
            bounds,
            vec![
                (dec!(120), dec!(130)),
                (dec!(110), dec!(120)),
                (dec!(100), dec!(110)),
                (dec!(90), dec!(100)),
            ]
        );
    }

    #[test]
    fn test_ladder_uneven_range_overshoots_min() {
        let levels = grid_levels(dec!(95), dec!(130), dec!(10)).unwrap();
        assert_eq!(levels.len(), 4);
        assert_eq!(levels.last().unwrap().start, dec!(90));
    }

    #[test]
    fn test_ladder_rejects_non_positive_gap() {
        assert_eq!(
            grid_levels(dec!(90), dec!(130), Decimal::ZERO),
            Err(IndicatorError::InvalidGap(Decimal::ZERO))
        );
    }

    #[test]
    fn test_ladder_rejects_oversized_range() {
        let levels = grid_levels(dec!(0), dec!(1000), dec!(1)).unwrap();
        assert_eq!(levels.len(), MAX_GRID_LEVELS);

        assert_eq!(
            grid_levels(dec!(0), dec!(1000.5), dec!(1)),
            Err(IndicatorError::TooManyLevels { max: MAX_GRID_LEVELS })
        );
        assert_eq!(
            grid_levels(dec!(1), dec!(60000), dec!(0.0000001)),
            Err(IndicatorError::TooManyLevels { max: MAX_GRID_LEVELS })
        );
    }

    #[test]
    fn test_envelope_tracks_both_extremes() {
        // A candle that is both a new low and a new high must update both sides
        let candles = vec![
            candle(dec!(100), dec!(110)),
            candle(dec!(95), dec!(120)),
            candle(dec!(101), dec!(105)),
        ];
        let envelope = price_envelope(&candles).unwrap();
        assert_eq!(envelope.min_price, dec!(95));
        assert_eq!(envelope.max_price, dec!(120));
        assert!(envelope.is_outside(dec!(94.99)));
        assert!(!envelope.is_outside(dec!(120)));
    }

    #[test]
    fn test_envelope_requires_candles() {
        assert!(price_envelope(&[]).is_err());
    }

    #[test]
    fn test_widening() {
        let base = PriceEnvelope {
            min_price: dec!(90),
            max_price: dec!(130),
        };
        let narrower = PriceEnvelope {
            min_price: dec!(95),
            max_price: dec!(125),
        };
        let wider = PriceEnvelope {
            min_price: dec!(90),
            max_price: dec!(140),
        };
        assert!(!base.is_widened_by(&narrower));
        assert!(base.is_widened_by(&wider));
    }
}
