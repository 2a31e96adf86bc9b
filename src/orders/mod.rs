//! User data stream: listen key lifecycle and execution report fan-out.
//!
//! Two tasks cooperate through a `watch` channel. The listen key task is the
//! only writer of the key: it creates it, renews it and replaces it when
//! renewal fails. The stream task follows the published key and reconnects
//! whenever it changes or the connection drops.

use crate::config::OrderStreamConfig;
use crate::exchange::websocket::{parse_user_event, run_session, user_data_url, SessionEnd};
use crate::exchange::{ExchangeApi, ExecutionReport};
use crate::market::{Delivery, Fanout};
use crate::shutdown::{wait_for_shutdown, ShutdownSignal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Owns the single user data stream and fans reports out to every trader.
pub struct OrderStreamManager {
    ws_base_url: String,
    renew_every: Duration,
    reconnect_delay: Duration,
    consumers: Fanout<ExecutionReport>,
}

impl OrderStreamManager {
    pub fn new(ws_base_url: &str, config: &OrderStreamConfig) -> Self {
        Self {
            ws_base_url: ws_base_url.to_string(),
            renew_every: Duration::from_secs(config.listen_key_renew_secs),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            consumers: Fanout::new("orders"),
        }
    }

    pub fn add_consumer(&mut self, sender: mpsc::Sender<ExecutionReport>) {
        self.consumers.add_consumer(sender);
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Handle one user data stream frame.
    pub fn dispatch(&self, text: &str) -> Option<Delivery> {
        match parse_user_event(text) {
            Ok(Some(report)) => {
                debug!(
                    order_id = report.order_id,
                    symbol = %report.symbol,
                    status = ?report.status,
                    "Execution report"
                );
                Some(self.consumers.publish(&report))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Discarding malformed user data message");
                None
            }
        }
    }

    /// Start the listen key and stream tasks.
    pub fn start(self, exchange: Arc<dyn ExchangeApi>, shutdown: ShutdownSignal) -> Vec<JoinHandle<()>> {
        info!(consumers = self.consumers.len(), "Starting order stream");
        let (key_tx, key_rx) = watch::channel(None);

        let keys = ListenKeyTask {
            exchange,
            renew_every: self.renew_every,
            retry_delay: self.reconnect_delay,
        };

        vec![
            tokio::spawn(keys.run(key_tx, shutdown.clone())),
            tokio::spawn(self.stream(key_rx, shutdown)),
        ]
    }

    /// Forward locally produced reports (paper trading) to every consumer.
    pub fn relay(
        self,
        mut reports: mpsc::Receiver<ExecutionReport>,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(consumers = self.consumers.len(), "Relaying local execution reports");
            loop {
                tokio::select! {
                    report = reports.recv() => match report {
                        Some(report) => {
                            self.consumers.publish(&report);
                        }
                        None => break,
                    },
                    _ = wait_for_shutdown(shutdown.clone()) => break,
                }
            }
            info!("Execution report relay stopped");
        })
    }

    async fn stream(self, mut key_rx: watch::Receiver<Option<String>>, shutdown: ShutdownSignal) {
        loop {
            let key = key_rx.borrow_and_update().clone();
            let Some(key) = key else {
                tokio::select! {
                    changed = key_rx.changed() => if changed.is_err() { break },
                    _ = wait_for_shutdown(shutdown.clone()) => break,
                }
                continue;
            };

            let url = user_data_url(&self.ws_base_url, &key);
            let mut key_watch = key_rx.clone();
            let stop_watch = shutdown.clone();
            // Stop the session on shutdown or when a new key is published.
            let stop = async move {
                tokio::select! {
                    _ = wait_for_shutdown(stop_watch) => {}
                    _ = key_watch.changed() => {}
                }
            };

            let ended = run_session(&url, stop, |text| {
                self.dispatch(text);
            })
            .await;

            if *shutdown.borrow() {
                break;
            }

            match ended {
                Ok(SessionEnd::Stopped) => {
                    info!("Listen key changed, reconnecting user data stream");
                    continue;
                }
                Ok(SessionEnd::ClosedByServer) => warn!("User data stream closed, reconnecting"),
                Err(e) => warn!(error = %e, "User data stream failed, reconnecting"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = wait_for_shutdown(shutdown.clone()) => break,
            }
        }
        info!("Order stream stopped");
    }
}

struct ListenKeyTask {
    exchange: Arc<dyn ExchangeApi>,
    renew_every: Duration,
    retry_delay: Duration,
}

impl ListenKeyTask {
    /// Create a key, retrying until it succeeds or shutdown is requested.
    async fn create(&self, shutdown: &ShutdownSignal) -> Option<String> {
        loop {
            match self.exchange.create_listen_key().await {
                Ok(key) => {
                    info!("Listen key created");
                    return Some(key);
                }
                Err(e) => error!(error = %e, "Failed to create listen key"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = wait_for_shutdown(shutdown.clone()) => return None,
            }
        }
    }

    async fn run(self, key_tx: watch::Sender<Option<String>>, shutdown: ShutdownSignal) {
        let Some(mut key) = self.create(&shutdown).await else {
            return;
        };
        key_tx.send_replace(Some(key.clone()));

        let mut renew = tokio::time::interval_at(
            tokio::time::Instant::now() + self.renew_every,
            self.renew_every,
        );
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = renew.tick() => {
                    match self.exchange.keepalive_listen_key(&key).await {
                        Ok(()) => debug!("Listen key renewed"),
                        Err(e) => {
                            warn!(error = %e, "Listen key renewal failed, creating a new one");
                            let Some(fresh) = self.create(&shutdown).await else {
                                break;
                            };
                            key = fresh;
                            key_tx.send_replace(Some(key.clone()));
                        }
                    }
                }
                _ = wait_for_shutdown(shutdown.clone()) => break,
            }
        }

        if let Err(e) = self.exchange.close_listen_key(&key).await {
            warn!(error = %e, "Failed to close listen key");
        } else {
            info!("Listen key closed");
        }
    }
}
