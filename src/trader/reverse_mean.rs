//! Mean-reversion trading policy: one position at a time.

use super::engine::Trader;
use super::trade::TradeStatus;
use rust_decimal::Decimal;
use tracing::{debug, warn};

impl Trader {
    /// BUY: open a position unless one is already open.
    pub(super) async fn reverse_mean_buy(&mut self, price: Option<Decimal>) {
        if !self.current_trades.is_empty() {
            debug!(
                trader_id = %self.id,
                open_trades = self.current_trades.len(),
                "BUY ignored, position already open"
            );
            return;
        }

        let price = self.last_price.or(price);
        if let Err(e) = self.open_position(price).await {
            warn!(trader_id = %self.id, symbol = %self.config.symbol, error = %e, "BUY refused");
        }
    }

    /// SELL: offer every filled trade for sale.
    pub(super) async fn reverse_mean_sell(&mut self, price: Option<Decimal>) {
        let filled: Vec<String> = self
            .current_trades
            .iter()
            .filter(|t| t.status == TradeStatus::Filled)
            .map(|t| t.id.clone())
            .collect();

        let price = self.last_price.or(price);
        for trade_id in filled {
            if let Err(e) = self.close_position(&trade_id, price).await {
                warn!(trader_id = %self.id, %trade_id, error = %e, "SELL refused");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::engine::tests::{report, trader};
    use super::*;
    use crate::exchange::OrderSide;
    use crate::signal::{Signal, SignalKind, StrategyKind};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn signal(kind: SignalKind) -> Signal {
        Signal {
            detector: StrategyKind::ReverseMean,
            symbol: Arc::from("BTCUSDT"),
            kind,
        }
    }

    #[tokio::test]
    async fn test_second_buy_opens_nothing() {
        let mut trader = trader(StrategyKind::ReverseMean);
        let buy = signal(SignalKind::Buy { price: Some(dec!(100)) });

        trader.on_signal(&buy).await;
        trader.on_signal(&buy).await;
        assert_eq!(trader.current_trades.len(), 1);
    }

    #[tokio::test]
    async fn test_buy_prefers_last_observed_price() {
        let mut trader = trader(StrategyKind::ReverseMean);
        trader.on_price(dec!(99)).await;
        trader.on_signal(&signal(SignalKind::Buy { price: Some(dec!(100)) })).await;
        assert_eq!(trader.current_trades[0].detected_price, dec!(99));
    }

    #[tokio::test]
    async fn test_sell_closes_only_filled_trades() {
        let mut trader = trader(StrategyKind::ReverseMean);
        trader.on_signal(&signal(SignalKind::Buy { price: Some(dec!(100)) })).await;

        // Still resting: SELL has nothing to close.
        trader.on_signal(&signal(SignalKind::Sell { price: Some(dec!(110)) })).await;
        assert_eq!(trader.current_trades[0].status, TradeStatus::BuyOpen);

        trader.on_execution_report(&report(1, OrderSide::Buy, dec!(1), dec!(100), Decimal::ZERO));
        trader.on_signal(&signal(SignalKind::Sell { price: Some(dec!(110)) })).await;
        assert_eq!(trader.current_trades[0].status, TradeStatus::SaleOpen);
        assert_eq!(trader.current_trades[0].sale_order_id, Some(2));
    }

    #[tokio::test]
    async fn test_signal_for_other_strategy_ignored() {
        let mut trader = trader(StrategyKind::ReverseMean);
        let mut foreign = signal(SignalKind::Buy { price: Some(dec!(100)) });
        foreign.detector = StrategyKind::Grid;
        trader.on_signal(&foreign).await;
        assert!(trader.current_trades.is_empty());
    }
}
