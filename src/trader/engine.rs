//! Shared trade lifecycle engine.
//!
//! Owns capital bookkeeping and the open trades of one strategy instance.
//! Strategy-specific decisions are dispatched on [`Policy`].

use super::grid::{GridAction, GridBook};
use super::trade::{BuyFill, SaleFill, Trade, TradeError, TradeLeg, TradeStatus};
use crate::config::TraderConfig;
use crate::exchange::{ExchangeApi, ExecutionReport, NewOrder, OrderSide, OrderStatus};
use crate::persistence::{TradeStore, TraderRecord};
use crate::signal::{Signal, SignalKind, StrategyKind};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Business-rule refusals and exchange failures of trader operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraderError {
    #[error("no price observed yet")]
    NoPrice,

    #[error("no free slot ({max_slots} in use)")]
    NoFreeSlot { max_slots: u32 },

    #[error("insufficient capital: need {required}, available {available}")]
    InsufficientCapital { required: Decimal, available: Decimal },

    #[error("trade {0} is not open")]
    UnknownTrade(String),

    #[error("trade {trade_id} is {status}, expected FILLED")]
    NotFilled { trade_id: String, status: TradeStatus },

    #[error("exchange call failed: {0}")]
    Exchange(String),

    #[error(transparent)]
    Trade(#[from] TradeError),
}

/// Capital fields of one trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraderAccount {
    pub initial_capital: Decimal,
    pub capital: Decimal,
    pub profit: Decimal,
    pub free_slots: u32,
    pub max_slots: u32,
    /// Sum of reserved amounts of trades still in `BuyOpen`
    pub total_reserved_amount: Decimal,
    pub total_fees: Decimal,
}

impl TraderAccount {
    fn new(capital: Decimal, max_slots: u32) -> Self {
        Self {
            initial_capital: capital,
            capital,
            profit: Decimal::ZERO,
            free_slots: max_slots,
            max_slots,
            total_reserved_amount: Decimal::ZERO,
            total_fees: Decimal::ZERO,
        }
    }

    /// Capital not earmarked by resting buy orders.
    pub fn available(&self) -> Decimal {
        self.capital - self.total_reserved_amount
    }

    fn release(&mut self, amount: Decimal) {
        self.total_reserved_amount = (self.total_reserved_amount - amount).max(Decimal::ZERO);
    }

    fn free_slot(&mut self) {
        self.free_slots = (self.free_slots + 1).min(self.max_slots);
    }
}

/// Strategy-specific state.
pub enum Policy {
    /// Single position, opened on BUY and closed on SELL
    ReverseMean,
    /// Ladder-driven positions, independent of BUY/SELL signals
    Grid(GridBook),
}

/// What an execution report did to this trader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Not one of this trader's orders
    Unmatched,
    /// Matched, but the status does not move the trade
    Pending(OrderStatus),
    Applied { trade_id: String, status: TradeStatus },
    /// Matched, but the trade could not take the transition
    Rejected,
}

pub struct Trader {
    pub(super) id: String,
    pub(super) config: TraderConfig,
    pub(super) account: TraderAccount,
    pub(super) current_trades: Vec<Trade>,
    pub(super) trade_history: Vec<Trade>,
    pub(super) last_price: Option<Decimal>,
    pub(super) policy: Policy,
    exchange: Arc<dyn ExchangeApi>,
    store: Arc<dyn TradeStore>,
}

impl Trader {
    /// Fresh trader with the full configured capital. Nothing is persisted.
    pub fn new(config: TraderConfig, exchange: Arc<dyn ExchangeApi>, store: Arc<dyn TradeStore>) -> Self {
        let policy = match config.strategy {
            StrategyKind::ReverseMean => Policy::ReverseMean,
            StrategyKind::Grid => Policy::Grid(GridBook::new(
                config.grid_gap.unwrap_or_default(),
                config.slots() as usize,
            )),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            account: TraderAccount::new(config.capital, config.slots()),
            config,
            current_trades: Vec::new(),
            trade_history: Vec::new(),
            last_price: None,
            policy,
            exchange,
            store,
        }
    }

    /// Restore the persisted trader for the same (symbol, strategy), or
    /// create and save a new one.
    pub fn bootstrap(
        config: TraderConfig,
        exchange: Arc<dyn ExchangeApi>,
        store: Arc<dyn TradeStore>,
    ) -> Self {
        let mut trader = Self::new(config, exchange, store);

        let existing = match trader.store.load_all_traders() {
            Ok(records) => records.into_iter().find(|r| {
                r.symbol == trader.config.symbol && r.strategy == trader.config.strategy
            }),
            Err(e) => {
                error!(symbol = %trader.config.symbol, error = %e, "Failed to load traders, starting fresh");
                None
            }
        };

        match existing {
            Some(record) => trader.restore(record),
            None => {
                if let Err(e) = trader.store.save_trader(&trader.record()) {
                    error!(trader_id = %trader.id, error = %e, "Failed to save trader");
                }
                info!(
                    trader_id = %trader.id,
                    symbol = %trader.config.symbol,
                    strategy = %trader.config.strategy,
                    capital = %trader.account.capital,
                    "Trader created"
                );
            }
        }

        trader
    }

    fn restore(&mut self, record: TraderRecord) {
        self.id = record.id;
        self.account = TraderAccount {
            initial_capital: record.initial_capital,
            capital: record.capital,
            profit: record.profit,
            free_slots: record.free_slots.min(record.max_slots),
            max_slots: record.max_slots,
            total_reserved_amount: record.total_reserved_amount,
            total_fees: record.total_fees,
        };

        match self.store.load_trades_by_trader(&self.id, Some(TradeStatus::Closed)) {
            Ok(trades) => self.current_trades = trades,
            Err(e) => error!(trader_id = %self.id, error = %e, "Failed to load open trades"),
        }

        // Reservations only exist for resting buys.
        self.account.total_reserved_amount = self
            .current_trades
            .iter()
            .filter(|t| t.status == TradeStatus::BuyOpen)
            .map(|t| t.reserved_amount)
            .sum();

        info!(
            trader_id = %self.id,
            symbol = %self.config.symbol,
            strategy = %self.config.strategy,
            capital = %self.account.capital,
            open_trades = self.current_trades.len(),
            "Trader restored"
        );
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &TraderConfig {
        &self.config
    }

    pub fn account(&self) -> &TraderAccount {
        &self.account
    }

    pub fn current_trades(&self) -> &[Trade] {
        &self.current_trades
    }

    pub fn trade_history(&self) -> &[Trade] {
        &self.trade_history
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn record(&self) -> TraderRecord {
        TraderRecord {
            id: self.id.clone(),
            symbol: self.config.symbol.clone(),
            strategy: self.config.strategy,
            initial_capital: self.account.initial_capital,
            capital: self.account.capital,
            profit: self.account.profit,
            free_slots: self.account.free_slots,
            max_slots: self.account.max_slots,
            total_reserved_amount: self.account.total_reserved_amount,
            trade_quantity: self.config.trade_quantity,
            total_fees: self.account.total_fees,
        }
    }

    // ==================== Persistence ====================

    fn persist_trader(&self) {
        if let Err(e) = self.store.update_trader(&self.record()) {
            error!(trader_id = %self.id, error = %e, "Failed to persist trader");
        }
    }

    fn persist_new_trade(&self, trade: &Trade) {
        if let Err(e) = self.store.save_trade(trade) {
            error!(trade_id = %trade.id, error = %e, "Failed to persist new trade");
        }
    }

    fn persist_trade(&self, trade: &Trade) {
        if let Err(e) = self.store.update_trade(trade) {
            error!(trade_id = %trade.id, error = %e, "Failed to persist trade");
        }
    }

    // ==================== Positions ====================

    /// Place a limit buy for the configured quantity and track it as a new trade.
    ///
    /// Returns the new trade id. Nothing changes when the order is refused
    /// or the exchange call fails.
    pub async fn open_position(&mut self, price: Option<Decimal>) -> Result<String, TraderError> {
        let price = price.or(self.last_price).ok_or(TraderError::NoPrice)?;

        if self.account.free_slots == 0 {
            return Err(TraderError::NoFreeSlot {
                max_slots: self.account.max_slots,
            });
        }

        let quantity = self.config.trade_quantity;
        let required = price * quantity;
        let available = self.account.available();
        if required > available {
            return Err(TraderError::InsufficientCapital { required, available });
        }

        let order = NewOrder::limit(&self.config.symbol, OrderSide::Buy, quantity, price);
        let response = self
            .exchange
            .place_order(&order)
            .await
            .map_err(|e| TraderError::Exchange(format!("{e:#}")))?;

        let trade = Trade::open(&self.id, response.order_id, price, quantity);
        self.account.free_slots -= 1;
        self.account.total_reserved_amount += trade.reserved_amount;

        info!(
            trader_id = %self.id,
            symbol = %self.config.symbol,
            trade_id = %trade.id,
            order_id = response.order_id,
            %price,
            %quantity,
            "Buy order placed"
        );

        self.persist_new_trade(&trade);
        let trade_id = trade.id.clone();
        self.current_trades.push(trade);
        self.persist_trader();
        Ok(trade_id)
    }

    /// Place a limit sell for a `Filled` trade at `price` or the last price.
    pub async fn close_position(&mut self, trade_id: &str, price: Option<Decimal>) -> Result<(), TraderError> {
        let idx = self
            .current_trades
            .iter()
            .position(|t| t.id == trade_id)
            .ok_or_else(|| TraderError::UnknownTrade(trade_id.to_string()))?;

        let status = self.current_trades[idx].status;
        if status != TradeStatus::Filled {
            return Err(TraderError::NotFilled {
                trade_id: trade_id.to_string(),
                status,
            });
        }

        let price = price.or(self.last_price).ok_or(TraderError::NoPrice)?;
        let quantity = self.current_trades[idx].quantity;
        let order = NewOrder::limit(&self.config.symbol, OrderSide::Sell, quantity, price);
        let response = self
            .exchange
            .place_order(&order)
            .await
            .map_err(|e| TraderError::Exchange(format!("{e:#}")))?;

        let trade = &mut self.current_trades[idx];
        trade.mark_sale_open(response.order_id)?;

        info!(
            trader_id = %self.id,
            symbol = %self.config.symbol,
            trade_id = %trade.id,
            order_id = response.order_id,
            %price,
            %quantity,
            "Sell order placed"
        );

        self.persist_trade(&self.current_trades[idx]);
        Ok(())
    }

    // ==================== Order reports ====================

    /// Apply an execution report to the trade it belongs to.
    pub fn on_execution_report(&mut self, report: &ExecutionReport) -> ReportOutcome {
        if report.symbol != self.config.symbol {
            return ReportOutcome::Unmatched;
        }

        let Some((idx, leg)) = self
            .current_trades
            .iter()
            .enumerate()
            .find_map(|(i, t)| t.matches_order(report.order_id).map(|leg| (i, leg)))
        else {
            return ReportOutcome::Unmatched;
        };

        if report.status != OrderStatus::Filled {
            let trade_id = &self.current_trades[idx].id;
            match report.status {
                OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::ExpiredInMatch => {
                    warn!(%trade_id, order_id = report.order_id, status = ?report.status, "Order ended without fill, trade stays open")
                }
                _ => debug!(%trade_id, order_id = report.order_id, status = ?report.status, "Order update"),
            }
            return ReportOutcome::Pending(report.status);
        }

        let expected_side = match leg {
            TradeLeg::Buy => OrderSide::Buy,
            TradeLeg::Sale => OrderSide::Sell,
        };
        if report.side != expected_side {
            warn!(order_id = report.order_id, side = ?report.side, "Report side does not match trade leg");
            return ReportOutcome::Rejected;
        }

        let outcome = match leg {
            TradeLeg::Buy => self.apply_buy_fill(idx, report),
            TradeLeg::Sale => self.apply_sale_fill(idx, report),
        };

        match outcome {
            Ok(applied) => applied,
            Err(e) => {
                warn!(trader_id = %self.id, order_id = report.order_id, error = %e, "Execution report rejected");
                ReportOutcome::Rejected
            }
        }
    }

    fn apply_buy_fill(&mut self, idx: usize, report: &ExecutionReport) -> Result<ReportOutcome, TradeError> {
        let trade = &mut self.current_trades[idx];
        trade.mark_filled(BuyFill {
            cost: report.cumulative_quote_qty,
            commission: report.commission,
            filled_qty: report.filled_qty,
        })?;

        let cost = report.cumulative_quote_qty;
        self.account.release(trade.reserved_amount);
        self.account.capital -= cost;
        self.account.total_fees += trade.fees_to_cover();

        info!(
            trader_id = %self.id,
            trade_id = %trade.id,
            %cost,
            buy_price = ?trade.buy_price,
            capital = %self.account.capital,
            "Buy filled"
        );

        let trade_id = trade.id.clone();
        self.persist_trade(&self.current_trades[idx]);
        self.persist_trader();
        Ok(ReportOutcome::Applied {
            trade_id,
            status: TradeStatus::Filled,
        })
    }

    fn apply_sale_fill(&mut self, idx: usize, report: &ExecutionReport) -> Result<ReportOutcome, TradeError> {
        let settlement = self.current_trades[idx].mark_closed(
            SaleFill {
                proceeds: report.cumulative_quote_qty,
                filled_qty: report.filled_qty,
            },
            Utc::now(),
        )?;

        self.account.capital += settlement.net_proceeds;
        self.account.profit += settlement.profit;
        self.account.free_slot();

        let trade = self.current_trades.remove(idx);
        info!(
            trader_id = %self.id,
            trade_id = %trade.id,
            profit = %settlement.profit,
            duration = ?trade.duration,
            capital = %self.account.capital,
            "Trade closed"
        );

        self.persist_trade(&trade);
        let trade_id = trade.id.clone();
        self.trade_history.push(trade);
        self.persist_trader();
        Ok(ReportOutcome::Applied {
            trade_id,
            status: TradeStatus::Closed,
        })
    }

    // ==================== Market input ====================

    /// Record the latest price and let the policy react to it.
    pub async fn on_price(&mut self, price: Decimal) {
        self.last_price = Some(price);

        let actions = match &self.policy {
            Policy::Grid(book) => book.plan(price, &self.current_trades),
            Policy::ReverseMean => return,
        };

        for action in actions {
            self.execute_grid_action(action).await;
        }

        if let Policy::Grid(book) = &mut self.policy {
            book.refresh_ranges(price);
        }
    }

    async fn execute_grid_action(&mut self, action: GridAction) {
        match action {
            GridAction::Open { cell_id } => match self.open_position(None).await {
                Ok(trade_id) => {
                    if let Policy::Grid(book) = &mut self.policy {
                        book.assign(&cell_id, trade_id);
                    }
                }
                Err(e) => warn!(trader_id = %self.id, %cell_id, error = %e, "Grid open refused"),
            },
            GridAction::Close { cell_id, trade_id } => match self.close_position(&trade_id, None).await {
                Ok(()) => {
                    if let Policy::Grid(book) = &mut self.policy {
                        book.release(&cell_id);
                    }
                }
                Err(e) => warn!(trader_id = %self.id, %cell_id, %trade_id, error = %e, "Grid close refused"),
            },
        }
    }

    /// Dispatch a detector signal to the strategy policy.
    pub async fn on_signal(&mut self, signal: &Signal) {
        if *signal.symbol != *self.config.symbol || signal.detector != self.config.strategy {
            debug!(trader_id = %self.id, symbol = %signal.symbol, "Ignoring signal for another trader");
            return;
        }

        let reverse_mean = matches!(self.policy, Policy::ReverseMean);
        match signal.kind {
            SignalKind::Buy { price } if reverse_mean => self.reverse_mean_buy(price).await,
            SignalKind::Sell { price } if reverse_mean => self.reverse_mean_sell(price).await,
            SignalKind::GridConfig { min_price, max_price } if !reverse_mean => {
                self.apply_grid_config(min_price, max_price)
            }
            kind => debug!(trader_id = %self.id, ?kind, "Signal not handled by this strategy"),
        }
    }
}
