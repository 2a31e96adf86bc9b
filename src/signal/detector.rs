//! Detector worker shared by every strategy.

use super::{GridBreakout, ReverseMean, Signal, SignalKind, StrategyKind};
use crate::indicators::{Candle, IndicatorError};
use crate::market::{Fanout, KlineBatch, PriceUpdate};
use crate::shutdown::{wait_for_shutdown, ShutdownSignal};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Strategy-specific part of a detector.
pub trait DetectionLogic: Send {
    /// Called with every parsed kline batch.
    fn on_klines(&mut self, candles: &[Candle]) -> Result<Option<SignalKind>, IndicatorError>;

    /// Called with every distinct price.
    fn on_price(&mut self, price: Decimal) -> Result<Option<SignalKind>, IndicatorError>;
}

struct DetectorCore {
    symbol: Arc<str>,
    strategy: StrategyKind,
    logic: Box<dyn DetectionLogic>,
    consumers: Fanout<Signal>,
}

impl DetectorCore {
    fn emit(&self, kind: Option<SignalKind>) -> Option<Signal> {
        let signal = Signal {
            detector: self.strategy,
            symbol: self.symbol.clone(),
            kind: kind?,
        };
        debug!(symbol = %self.symbol, strategy = %self.strategy, kind = ?signal.kind, "Signal");
        self.consumers.publish(&signal);
        Some(signal)
    }

    fn handle_klines(&mut self, batch: &KlineBatch) -> Option<Signal> {
        let outcome = batch
            .candles()
            .and_then(|candles| self.logic.on_klines(&candles));
        match outcome {
            Ok(kind) => self.emit(kind),
            Err(e) => {
                warn!(symbol = %self.symbol, strategy = %self.strategy, error = %e, "Kline batch rejected");
                None
            }
        }
    }

    fn handle_price(&mut self, price: Decimal) -> Option<Signal> {
        match self.logic.on_price(price) {
            Ok(kind) => self.emit(kind),
            Err(e) => {
                warn!(symbol = %self.symbol, strategy = %self.strategy, error = %e, "Price update rejected");
                None
            }
        }
    }
}

/// Consumes market data for one (symbol, strategy) and publishes signals.
pub struct SignalDetector {
    core: DetectorCore,
    price_tx: mpsc::Sender<PriceUpdate>,
    price_rx: mpsc::Receiver<PriceUpdate>,
    klines_tx: mpsc::Sender<KlineBatch>,
    klines_rx: mpsc::Receiver<KlineBatch>,
}

impl SignalDetector {
    pub fn new(
        symbol: &str,
        strategy: StrategyKind,
        logic: Box<dyn DetectionLogic>,
        queue_capacity: usize,
    ) -> Self {
        let (price_tx, price_rx) = mpsc::channel(queue_capacity);
        let (klines_tx, klines_rx) = mpsc::channel(queue_capacity);
        Self {
            core: DetectorCore {
                symbol: Arc::from(symbol),
                strategy,
                logic,
                consumers: Fanout::new(format!("signal:{symbol}:{strategy}")),
            },
            price_tx,
            price_rx,
            klines_tx,
            klines_rx,
        }
    }

    /// Detector with the default parameters of `strategy`.
    pub fn for_strategy(symbol: &str, strategy: StrategyKind, queue_capacity: usize) -> Self {
        let logic: Box<dyn DetectionLogic> = match strategy {
            StrategyKind::ReverseMean => Box::new(ReverseMean::default()),
            StrategyKind::Grid => Box::new(GridBreakout::default()),
        };
        Self::new(symbol, strategy, logic, queue_capacity)
    }

    pub fn symbol(&self) -> &str {
        &self.core.symbol
    }

    pub fn strategy(&self) -> StrategyKind {
        self.core.strategy
    }

    /// Queue to register with the market data hub for prices.
    pub fn price_sender(&self) -> mpsc::Sender<PriceUpdate> {
        self.price_tx.clone()
    }

    /// Queue to register with the market data hub for klines.
    pub fn klines_sender(&self) -> mpsc::Sender<KlineBatch> {
        self.klines_tx.clone()
    }

    pub fn add_signal_consumer(&mut self, sender: mpsc::Sender<Signal>) {
        self.core.consumers.add_consumer(sender);
    }

    /// Spawn the detection loop.
    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: ShutdownSignal) {
        let Self {
            mut core,
            price_tx,
            mut price_rx,
            klines_tx,
            mut klines_rx,
        } = self;
        // Only the hub's clones remain, so the loop ends if the hub goes away.
        drop(price_tx);
        drop(klines_tx);

        info!(
            symbol = %core.symbol,
            strategy = %core.strategy,
            consumers = core.consumers.len(),
            "Signal detector started"
        );

        loop {
            tokio::select! {
                Some(update) = price_rx.recv() => {
                    core.handle_price(update.price);
                }
                Some(batch) = klines_rx.recv() => {
                    core.handle_klines(&batch);
                }
                _ = wait_for_shutdown(shutdown.clone()) => break,
                else => break,
            }
        }

        info!(symbol = %core.symbol, strategy = %core.strategy, "Signal detector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;

    fn batch(symbol: &str, lows_highs: &[(&str, &str)]) -> KlineBatch {
        let rows = lows_highs
            .iter()
            .enumerate()
            .map(|(i, (low, high))| {
                vec![json!(i), json!(low), json!(high), json!(low), json!(high), json!("1"), json!(i + 1)]
            })
            .collect();
        KlineBatch {
            symbol: Arc::from(symbol),
            interval: Arc::from("1m"),
            rows: Arc::new(rows),
        }
    }

    #[tokio::test]
    async fn test_grid_detector_publishes_envelope() {
        let mut detector = SignalDetector::for_strategy("BTCUSDT", StrategyKind::Grid, 16);
        let (tx, mut rx) = mpsc::channel(16);
        detector.add_signal_consumer(tx);

        let signal = detector
            .core
            .handle_klines(&batch("BTCUSDT", &[("90", "120"), ("100", "130")]))
            .unwrap();
        assert_eq!(signal.detector, StrategyKind::Grid);
        assert_eq!(
            signal.kind,
            SignalKind::GridConfig { min_price: dec!(90), max_price: dec!(130) }
        );
        assert_eq!(rx.recv().await, Some(signal));

        assert!(detector.core.handle_price(dec!(100)).is_none());
        assert!(detector.core.handle_price(dec!(140)).is_some());
    }

    #[test]
    fn test_malformed_batch_is_rejected_without_signal() {
        let mut detector = SignalDetector::for_strategy("BTCUSDT", StrategyKind::Grid, 16);
        let mut bad = batch("BTCUSDT", &[("90", "120")]);
        bad.rows = Arc::new(vec![vec![json!("x")]]);
        assert!(detector.core.handle_klines(&bad).is_none());
    }

    #[tokio::test]
    async fn test_run_consumes_queues_until_shutdown() {
        let mut detector = SignalDetector::for_strategy("ETHUSDT", StrategyKind::Grid, 16);
        let (tx, mut rx) = mpsc::channel(16);
        detector.add_signal_consumer(tx);
        let klines = detector.klines_sender();
        let prices = detector.price_sender();

        let (stop_tx, shutdown) = crate::shutdown::channel();
        let handle = detector.spawn(shutdown);

        klines.send(batch("ETHUSDT", &[("10", "20")])).await.unwrap();
        assert!(rx.recv().await.is_some());

        prices
            .send(PriceUpdate { symbol: Arc::from("ETHUSDT"), price: dec!(25) })
            .await
            .unwrap();
        assert!(rx.recv().await.is_some());

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
