//! Queue topology: feeds -> detectors -> traders <- order reports.

use crate::config::Config;
use crate::exchange::{ExchangeApi, ExecutionReport};
use crate::market::{MarketDataHub, MarketSettings};
use crate::orders::OrderStreamManager;
use crate::persistence::TradeStore;
use crate::shutdown::ShutdownSignal;
use crate::signal::{SignalDetector, StrategyKind};
use crate::trader::{Trader, TraderWorker};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Where execution reports come from.
pub enum OrderSource {
    /// The exchange user data stream.
    UserDataStream,
    /// Reports produced in-process, e.g. by the paper exchange.
    Local(mpsc::Receiver<ExecutionReport>),
}

/// Every registry, fully wired but not yet running.
pub struct Orchestrator {
    exchange: Arc<dyn ExchangeApi>,
    hub: MarketDataHub,
    detectors: Vec<SignalDetector>,
    workers: Vec<TraderWorker>,
    orders: OrderStreamManager,
    traders: Vec<Arc<Mutex<Trader>>>,
}

impl Orchestrator {
    /// Restore or create every configured trader and connect the queues.
    pub fn build(config: &Config, exchange: Arc<dyn ExchangeApi>, store: Arc<dyn TradeStore>) -> Self {
        let capacity = config.market_data.queue_capacity;

        let mut hub = MarketDataHub::new(MarketSettings::from_config(&config.binance, &config.market_data));
        let mut orders = OrderStreamManager::new(&config.binance.trade_websocket_base_url, &config.orders);
        let mut detectors: BTreeMap<(String, StrategyKind, String), SignalDetector> = BTreeMap::new();
        let mut workers = Vec::with_capacity(config.traders.len());
        let mut traders = Vec::with_capacity(config.traders.len());

        for trader_config in &config.traders {
            let interval = trader_config.kline_interval(&config.market_data.kline_interval);
            let key = (trader_config.symbol.clone(), trader_config.strategy, interval.to_string());
            let detector = detectors.entry(key).or_insert_with(|| {
                let detector =
                    SignalDetector::for_strategy(&trader_config.symbol, trader_config.strategy, capacity);
                hub.subscribe_price(&trader_config.symbol, detector.price_sender());
                hub.subscribe_klines(&trader_config.symbol, interval, detector.klines_sender());
                detector
            });

            let trader = Trader::bootstrap(trader_config.clone(), exchange.clone(), store.clone());
            let worker = TraderWorker::new(trader, capacity);

            hub.subscribe_price(&trader_config.symbol, worker.price_sender());
            detector.add_signal_consumer(worker.signal_sender());
            orders.add_consumer(worker.order_sender());

            traders.push(worker.trader());
            workers.push(worker);
        }

        info!(
            traders = workers.len(),
            detectors = detectors.len(),
            price_feeds = hub.price_symbols().len(),
            kline_feeds = hub.kline_streams().len(),
            "Topology built"
        );

        Self {
            exchange,
            hub,
            detectors: detectors.into_values().collect(),
            workers,
            orders,
            traders,
        }
    }

    /// Shared handles to every trader, in configuration order.
    pub fn traders(&self) -> &[Arc<Mutex<Trader>>] {
        &self.traders
    }

    /// Spawn every worker. Consumers start before producers.
    pub fn start(self, order_source: OrderSource, shutdown: ShutdownSignal) -> Running {
        let mut handles = Vec::new();

        for worker in self.workers {
            handles.extend(worker.spawn(shutdown.clone()));
        }

        for detector in self.detectors {
            handles.push(detector.spawn(shutdown.clone()));
        }

        match order_source {
            OrderSource::UserDataStream => {
                handles.extend(self.orders.start(self.exchange.clone(), shutdown.clone()));
            }
            OrderSource::Local(reports) => {
                handles.push(self.orders.relay(reports, shutdown.clone()));
            }
        }

        handles.extend(self.hub.start(self.exchange, shutdown));

        info!(tasks = handles.len(), "All workers started");
        Running {
            handles,
            traders: self.traders,
        }
    }
}

/// Started system.
pub struct Running {
    handles: Vec<JoinHandle<()>>,
    traders: Vec<Arc<Mutex<Trader>>>,
}

impl Running {
    pub fn traders(&self) -> &[Arc<Mutex<Trader>>] {
        &self.traders
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to finish.
    pub async fn join_all(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("All workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraderConfig;
    use crate::exchange::{MockExchangeApi, PaperExchange, DEFAULT_PAPER_FEE_RATE};
    use crate::indicators::RawKline;
    use crate::market::{KlineBatch, PriceUpdate};
    use crate::persistence::SqliteStore;
    use crate::trader::TradeStatus;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;

    fn trader_config(symbol: &str, strategy: StrategyKind) -> TraderConfig {
        TraderConfig {
            symbol: symbol.to_string(),
            strategy,
            capital: dec!(1000),
            trade_quantity: dec!(1),
            grid_gap: (strategy == StrategyKind::Grid).then_some(dec!(10)),
            max_slots: None,
            kline_interval: None,
        }
    }

    #[test]
    fn test_build_shares_detectors_and_feeds() {
        let config = Config {
            traders: vec![
                trader_config("BTCUSDT", StrategyKind::ReverseMean),
                trader_config("BTCUSDT", StrategyKind::Grid),
                trader_config("ETHUSDT", StrategyKind::ReverseMean),
            ],
            ..Config::default()
        };
        let store: Arc<dyn TradeStore> = Arc::new(SqliteStore::open(":memory:").unwrap());

        let orchestrator = Orchestrator::build(&config, Arc::new(MockExchangeApi::new()), store.clone());

        assert_eq!(orchestrator.traders().len(), 3);
        assert_eq!(orchestrator.detectors.len(), 3);
        assert_eq!(orchestrator.hub.price_symbols(), vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(orchestrator.hub.kline_streams().len(), 2);
        assert_eq!(orchestrator.orders.consumer_count(), 3);
        assert_eq!(store.load_all_traders().unwrap().len(), 3);
    }

    #[test]
    fn test_kline_interval_override_gets_own_stream() {
        let mut slow = trader_config("ETHUSDT", StrategyKind::Grid);
        slow.kline_interval = Some("1h".to_string());
        let config = Config {
            traders: vec![
                trader_config("ETHUSDT", StrategyKind::ReverseMean),
                slow,
            ],
            ..Config::default()
        };
        let store: Arc<dyn TradeStore> = Arc::new(SqliteStore::open(":memory:").unwrap());

        let orchestrator = Orchestrator::build(&config, Arc::new(MockExchangeApi::new()), store);

        assert_eq!(orchestrator.detectors.len(), 2);
        assert_eq!(orchestrator.hub.price_symbols(), vec!["ETHUSDT"]);
        assert_eq!(
            orchestrator.hub.kline_streams(),
            vec![("ETHUSDT", "1h"), ("ETHUSDT", "1m")]
        );
    }

    #[tokio::test]
    async fn test_signal_to_fill_through_paper_exchange() {
        let config = Config {
            traders: vec![trader_config("BTCUSDT", StrategyKind::ReverseMean)],
            ..Config::default()
        };
        let (fills_tx, fills_rx) = mpsc::channel(16);
        let exchange: Arc<dyn ExchangeApi> =
            Arc::new(PaperExchange::new(DEFAULT_PAPER_FEE_RATE).with_fill_reports(fills_tx));
        let store: Arc<dyn TradeStore> = Arc::new(SqliteStore::open(":memory:").unwrap());

        let mut orchestrator = Orchestrator::build(&config, exchange, store);

        // Drive the detector directly instead of the network feeds.
        let detector = orchestrator.detectors.remove(0);
        let detector_klines = detector.klines_sender();
        let trader = orchestrator.traders()[0].clone();

        let worker = orchestrator.workers.remove(0);
        let trader_prices = worker.price_sender();

        let (stop_tx, shutdown) = crate::shutdown::channel();
        let mut handles = worker.spawn(shutdown.clone());
        handles.push(detector.spawn(shutdown.clone()));
        handles.push(orchestrator.orders.relay(fills_rx, shutdown));

        // Nineteen flat closes at 100 then 80: far below the lower band.
        let rows: Vec<RawKline> = (0..20)
            .map(|i| {
                let close = if i == 19 { "80" } else { "100" };
                json!([i * 60_000, close, close, close, close, "1", i * 60_000 + 59_999])
                    .as_array()
                    .cloned()
                    .unwrap()
            })
            .collect();
        detector_klines
            .send(KlineBatch {
                symbol: Arc::from("BTCUSDT"),
                interval: Arc::from("1m"),
                rows: Arc::new(rows),
            })
            .await
            .unwrap();
        trader_prices
            .send(PriceUpdate {
                symbol: Arc::from("BTCUSDT"),
                price: dec!(80),
            })
            .await
            .unwrap();

        let mut filled = false;
        for _ in 0..200 {
            let guard = trader.lock().await;
            if guard
                .current_trades()
                .first()
                .is_some_and(|t| t.status == TradeStatus::Filled)
            {
                filled = true;
                break;
            }
            drop(guard);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(filled, "trade never filled");

        stop_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
