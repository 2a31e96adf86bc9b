//! Three consumption loops per trader, serialized on one lock.

use super::engine::{ReportOutcome, Trader};
use crate::exchange::ExecutionReport;
use crate::market::PriceUpdate;
use crate::shutdown::{wait_for_shutdown, ShutdownSignal};
use crate::signal::Signal;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Owns a trader and the queues feeding it.
pub struct TraderWorker {
    trader: Arc<Mutex<Trader>>,
    price_tx: mpsc::Sender<PriceUpdate>,
    price_rx: mpsc::Receiver<PriceUpdate>,
    signal_tx: mpsc::Sender<Signal>,
    signal_rx: mpsc::Receiver<Signal>,
    order_tx: mpsc::Sender<ExecutionReport>,
    order_rx: mpsc::Receiver<ExecutionReport>,
}

impl TraderWorker {
    pub fn new(trader: Trader, queue_capacity: usize) -> Self {
        let (price_tx, price_rx) = mpsc::channel(queue_capacity);
        let (signal_tx, signal_rx) = mpsc::channel(queue_capacity);
        let (order_tx, order_rx) = mpsc::channel(queue_capacity);
        Self {
            trader: Arc::new(Mutex::new(trader)),
            price_tx,
            price_rx,
            signal_tx,
            signal_rx,
            order_tx,
            order_rx,
        }
    }

    /// Shared handle for inspection.
    pub fn trader(&self) -> Arc<Mutex<Trader>> {
        self.trader.clone()
    }

    pub fn price_sender(&self) -> mpsc::Sender<PriceUpdate> {
        self.price_tx.clone()
    }

    pub fn signal_sender(&self) -> mpsc::Sender<Signal> {
        self.signal_tx.clone()
    }

    pub fn order_sender(&self) -> mpsc::Sender<ExecutionReport> {
        self.order_tx.clone()
    }

    /// Spawn the price, signal and order loops.
    pub fn spawn(self, shutdown: ShutdownSignal) -> Vec<JoinHandle<()>> {
        let Self {
            trader,
            price_tx,
            price_rx,
            signal_tx,
            signal_rx,
            order_tx,
            order_rx,
        } = self;
        drop((price_tx, signal_tx, order_tx));

        vec![
            tokio::spawn(price_loop(trader.clone(), price_rx, shutdown.clone())),
            tokio::spawn(signal_loop(trader.clone(), signal_rx, shutdown.clone())),
            tokio::spawn(order_loop(trader, order_rx, shutdown)),
        ]
    }
}

async fn price_loop(
    trader: Arc<Mutex<Trader>>,
    mut rx: mpsc::Receiver<PriceUpdate>,
    shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(update) => trader.lock().await.on_price(update.price).await,
                None => break,
            },
            _ = wait_for_shutdown(shutdown.clone()) => break,
        }
    }
    debug!("Trader price loop stopped");
}

async fn signal_loop(
    trader: Arc<Mutex<Trader>>,
    mut rx: mpsc::Receiver<Signal>,
    shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            signal = rx.recv() => match signal {
                Some(signal) => {
                    let mut trader = trader.lock().await;
                    info!(trader_id = %trader.id(), kind = ?signal.kind, "Signal received");
                    trader.on_signal(&signal).await;
                }
                None => break,
            },
            _ = wait_for_shutdown(shutdown.clone()) => break,
        }
    }
    debug!("Trader signal loop stopped");
}

async fn order_loop(
    trader: Arc<Mutex<Trader>>,
    mut rx: mpsc::Receiver<ExecutionReport>,
    shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            report = rx.recv() => match report {
                Some(report) => {
                    let outcome = trader.lock().await.on_execution_report(&report);
                    if outcome != ReportOutcome::Unmatched {
                        debug!(order_id = report.order_id, ?outcome, "Execution report handled");
                    }
                }
                None => break,
            },
            _ = wait_for_shutdown(shutdown.clone()) => break,
        }
    }
    debug!("Trader order loop stopped");
}
