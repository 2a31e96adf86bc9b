//! Paper trading exchange.
//!
//! Orders fill immediately at their limit price and the matching
//! `FILLED` execution report is pushed to a local channel instead of a
//! user data stream. Market data can be delegated to a live client so
//! strategies still see real prices.

use super::traits::ExchangeApi;
use super::types::*;
use crate::indicators::RawKline;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Default simulated commission rate (0.1%).
pub const DEFAULT_PAPER_FEE_RATE: Decimal = dec!(0.001);

const PAPER_LISTEN_KEY: &str = "paper";

/// Simulated spot exchange.
pub struct PaperExchange {
    next_order_id: AtomicI64,
    fee_rate: Decimal,
    market_data: Option<Arc<dyn ExchangeApi>>,
    fill_reports: Option<mpsc::Sender<ExecutionReport>>,
    placed: RwLock<Vec<(i64, NewOrder)>>,
}

impl PaperExchange {
    pub fn new(fee_rate: Decimal) -> Self {
        Self {
            next_order_id: AtomicI64::new(1),
            fee_rate,
            market_data: None,
            fill_reports: None,
            placed: RwLock::new(Vec::new()),
        }
    }

    /// Serve klines from a real exchange client.
    pub fn with_market_data(mut self, source: Arc<dyn ExchangeApi>) -> Self {
        self.market_data = Some(source);
        self
    }

    /// Channel that receives a `FILLED` report for every placed order.
    pub fn with_fill_reports(mut self, tx: mpsc::Sender<ExecutionReport>) -> Self {
        self.fill_reports = Some(tx);
        self
    }

    /// Orders placed so far with their assigned ids.
    pub async fn placed_orders(&self) -> Vec<(i64, NewOrder)> {
        self.placed.read().await.clone()
    }

    fn fill_report(&self, order_id: i64, order: &NewOrder, price: Decimal) -> ExecutionReport {
        let quote = order.quantity * price;
        // Buys pay commission in the base asset, sells in the quote asset.
        let (commission, asset) = match order.side {
            OrderSide::Buy => (order.quantity * self.fee_rate, base_asset(&order.symbol)),
            OrderSide::Sell => (quote * self.fee_rate, quote_asset(&order.symbol)),
        };

        ExecutionReport {
            event_time: chrono::Utc::now().timestamp_millis(),
            symbol: order.symbol.clone(),
            order_id,
            side: order.side,
            status: OrderStatus::Filled,
            filled_qty: order.quantity,
            cumulative_quote_qty: quote,
            commission,
            commission_asset: Some(asset),
            last_price: price,
        }
    }
}

fn quote_asset(symbol: &str) -> String {
    ["USDT", "USDC", "FDUSD", "BTC", "ETH", "BNB"]
        .iter()
        .find(|q| symbol.ends_with(*q) && symbol.len() > q.len())
        .map(|q| q.to_string())
        .unwrap_or_default()
}

fn base_asset(symbol: &str) -> String {
    let quote = quote_asset(symbol);
    symbol[..symbol.len() - quote.len()].to_string()
}

#[async_trait]
impl ExchangeApi for PaperExchange {
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u16) -> Result<Vec<RawKline>> {
        match &self.market_data {
            Some(source) => source.get_klines(symbol, interval, limit).await,
            None => Ok(Vec::new()),
        }
    }

    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse> {
        let Some(price) = order.price else {
            bail!("Paper exchange only accepts limit orders");
        };
        if order.quantity <= Decimal::ZERO {
            bail!("Order quantity must be positive, got {}", order.quantity);
        }

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        self.placed.write().await.push((order_id, order.clone()));

        info!(
            order_id,
            symbol = %order.symbol,
            side = order.side.as_str(),
            qty = %order.quantity,
            %price,
            "[PAPER] Order filled"
        );

        if let Some(tx) = &self.fill_reports {
            let report = self.fill_report(order_id, order, price);
            if let Err(e) = tx.try_send(report) {
                warn!(order_id, error = %e, "[PAPER] Dropped fill report");
            }
        }

        Ok(OrderResponse {
            order_id,
            symbol: order.symbol.clone(),
            client_order_id: None,
            transact_time: Some(chrono::Utc::now().timestamp_millis()),
            status: Some(OrderStatus::Filled),
        })
    }

    async fn create_listen_key(&self) -> Result<String> {
        debug!("[PAPER] Issuing listen key");
        Ok(PAPER_LISTEN_KEY.to_string())
    }

    async fn keepalive_listen_key(&self, _listen_key: &str) -> Result<()> {
        Ok(())
    }

    async fn close_listen_key(&self, _listen_key: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::traits::MockExchangeApi;
    use serde_json::json;

    #[tokio::test]
    async fn test_buy_fill_report() {
        let (tx, mut rx) = mpsc::channel(4);
        let paper = PaperExchange::new(dec!(0.001)).with_fill_reports(tx);

        let order = NewOrder::limit("BTCUSDT", OrderSide::Buy, dec!(2), dec!(100));
        let response = paper.place_order(&order).await.unwrap();
        assert_eq!(response.order_id, 1);

        let report = rx.recv().await.unwrap();
        assert_eq!(report.order_id, 1);
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.cumulative_quote_qty, dec!(200));
        assert_eq!(report.filled_qty, dec!(2));
        assert_eq!(report.commission, dec!(0.002));
        assert_eq!(report.commission_asset.as_deref(), Some("BTC"));
    }

    #[tokio::test]
    async fn test_sell_commission_in_quote() {
        let (tx, mut rx) = mpsc::channel(4);
        let paper = PaperExchange::new(dec!(0.001)).with_fill_reports(tx);

        let order = NewOrder::limit("ETHUSDT", OrderSide::Sell, dec!(1), dec!(3000));
        paper.place_order(&order).await.unwrap();

        let report = rx.recv().await.unwrap();
        assert_eq!(report.commission, dec!(3));
        assert_eq!(report.commission_asset.as_deref(), Some("USDT"));
    }

    #[tokio::test]
    async fn test_order_ids_are_sequential() {
        let paper = PaperExchange::new(DEFAULT_PAPER_FEE_RATE);
        let order = NewOrder::limit("BTCUSDT", OrderSide::Buy, dec!(1), dec!(1));
        let first = paper.place_order(&order).await.unwrap().order_id;
        let second = paper.place_order(&order).await.unwrap().order_id;
        assert_eq!(second, first + 1);
        assert_eq!(paper.placed_orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_zero_quantity() {
        let paper = PaperExchange::new(DEFAULT_PAPER_FEE_RATE);
        let order = NewOrder::limit("BTCUSDT", OrderSide::Buy, Decimal::ZERO, dec!(1));
        assert!(paper.place_order(&order).await.is_err());
    }

    #[tokio::test]
    async fn test_klines_delegate_to_market_data() {
        let mut source = MockExchangeApi::new();
        source
            .expect_get_klines()
            .returning(|_, _, _| Ok(vec![vec![json!(1), json!("1")]]));

        let paper = PaperExchange::new(DEFAULT_PAPER_FEE_RATE).with_market_data(Arc::new(source));
        let rows = paper.get_klines("BTCUSDT", "1m", 10).await.unwrap();
        assert_eq!(rows.len(), 1);

        let bare = PaperExchange::new(DEFAULT_PAPER_FEE_RATE);
        assert!(bare.get_klines("BTCUSDT", "1m", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_asset_split() {
        assert_eq!(base_asset("BTCUSDT"), "BTC");
        assert_eq!(quote_asset("ETHBTC"), "BTC");
        assert_eq!(base_asset("ETHBTC"), "ETH");
    }
}
