//! Grid envelope detection.

use super::detector::DetectionLogic;
use super::SignalKind;
use crate::indicators::{price_envelope, Candle, IndicatorError, PriceEnvelope};
use rust_decimal::Decimal;
use tracing::info;

/// Publishes the price envelope the grid trader lays its ladder over.
///
/// The envelope is taken from the first usable kline batch and stays fixed.
#[derive(Default)]
pub struct GridBreakout {
    envelope: Option<PriceEnvelope>,
}

impl GridBreakout {
    pub fn envelope(&self) -> Option<&PriceEnvelope> {
        self.envelope.as_ref()
    }

    fn config_signal(envelope: &PriceEnvelope) -> SignalKind {
        SignalKind::GridConfig {
            min_price: envelope.min_price,
            max_price: envelope.max_price,
        }
    }
}

impl DetectionLogic for GridBreakout {
    fn on_klines(&mut self, candles: &[Candle]) -> Result<Option<SignalKind>, IndicatorError> {
        if self.envelope.is_none() {
            let envelope = price_envelope(candles)?;
            info!(min = %envelope.min_price, max = %envelope.max_price, "Grid envelope set");
            self.envelope = Some(envelope);
        }
        Ok(self.envelope.as_ref().map(Self::config_signal))
    }

    fn on_price(&mut self, price: Decimal) -> Result<Option<SignalKind>, IndicatorError> {
        Ok(self
            .envelope
            .as_ref()
            .filter(|envelope| envelope.is_outside(price))
            .map(Self::config_signal))
    }
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
            volume: dec!(1),
            close_time: 59_999,
        }
    }

    #[test]
    fn test_envelope_fixed_after_first_batch() {
        let mut logic = GridBreakout::default();
        let first = logic
            .on_klines(&[candle(dec!(95), dec!(120)), candle(dec!(90), dec!(130))])
            .unwrap();
        assert_eq!(
            first,
            Some(SignalKind::GridConfig { min_price: dec!(90), max_price: dec!(130) })
        );

        let second = logic.on_klines(&[candle(dec!(10), dec!(500))]).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn test_price_inside_envelope_is_silent() {
        let mut logic = GridBreakout::default();
        assert_eq!(logic.on_price(dec!(100)).unwrap(), None);

        logic.on_klines(&[candle(dec!(90), dec!(130))]).unwrap();
        assert_eq!(logic.on_price(dec!(90)).unwrap(), None);
        assert_eq!(logic.on_price(dec!(130)).unwrap(), None);
        assert!(logic.on_price(dec!(131)).unwrap().is_some());
        assert!(logic.on_price(dec!(89.99)).unwrap().is_some());
    }

    #[test]
    fn test_empty_batch_before_envelope_errors() {
        let mut logic = GridBreakout::default();
        assert!(logic.on_klines(&[]).is_err());
        assert!(logic.envelope().is_none());
    }
}
