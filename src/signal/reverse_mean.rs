//! Bollinger band mean-reversion detection.

use super::detector::DetectionLogic;
use super::SignalKind;
use crate::indicators::{
    bollinger_bands, BandCrossing, BollingerBands, Candle, IndicatorError, DEFAULT_NUM_STD,
    DEFAULT_WINDOW,
};
use rust_decimal::Decimal;
use tracing::debug;

/// Buy below the lower band, sell once price is back above the moving average.
pub struct ReverseMean {
    window: usize,
    num_std: Decimal,
    bands: Option<BollingerBands>,
}

impl Default for ReverseMean {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_NUM_STD)
    }
}

impl ReverseMean {
    pub fn new(window: usize, num_std: Decimal) -> Self {
        Self {
            window,
            num_std,
            bands: None,
        }
    }

    pub fn bands(&self) -> Option<&BollingerBands> {
        self.bands.as_ref()
    }

    fn evaluate(&self, price: Decimal) -> Option<SignalKind> {
        let bands = self.bands.as_ref()?;
        match bands.crossing(price)? {
            BandCrossing::BelowLower => Some(SignalKind::Buy { price: Some(price) }),
            BandCrossing::AboveMiddle => Some(SignalKind::Sell { price: Some(price) }),
        }
    }
}

impl DetectionLogic for ReverseMean {
    fn on_klines(&mut self, candles: &[Candle]) -> Result<Option<SignalKind>, IndicatorError> {
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        // Keep the previous bands if this batch is unusable.
        let bands = bollinger_bands(&closes, self.window, self.num_std)?;
        debug!(middle = %bands.middle, lower = %bands.lower, "Bands updated");
        self.bands = Some(bands);

        Ok(closes.last().and_then(|close| self.evaluate(*close)))
    }

    fn on_price(&mut self, price: Decimal) -> Result<Option<SignalKind>, IndicatorError> {
        Ok(self.evaluate(price))
    }
}
