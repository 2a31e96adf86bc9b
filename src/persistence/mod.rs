//! SQLite persistence for traders and their trades.
//!
//! Writes happen after every in-memory transition. They are not part of the
//! transition itself: a failed write is logged by the caller and the state
//! machine carries on.

use crate::signal::StrategyKind;
use crate::trader::{Trade, TradeStatus};
use crate::utils::decimal::percentage_of;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Persisted trader row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraderRecord {
    pub id: String,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub initial_capital: Decimal,
    pub capital: Decimal,
    pub profit: Decimal,
    pub free_slots: u32,
    pub max_slots: u32,
    pub total_reserved_amount: Decimal,
    pub trade_quantity: Decimal,
    /// Buy commissions paid so far, in quote terms
    pub total_fees: Decimal,
}

impl TraderRecord {
    /// Realized profit as a percentage of the initial capital.
    pub fn progress_percentage(&self) -> Decimal {
        percentage_of(self.profit, self.initial_capital)
    }
}

/// Storage operations used by the trading engine.
#[cfg_attr(test, mockall::automock)]
pub trait TradeStore: Send + Sync {
    fn save_trader(&self, trader: &TraderRecord) -> Result<()>;

    fn update_trader(&self, trader: &TraderRecord) -> Result<()>;

    fn load_all_traders(&self) -> Result<Vec<TraderRecord>>;

    fn save_trade(&self, trade: &Trade) -> Result<()>;

    fn update_trade(&self, trade: &Trade) -> Result<()>;

    /// Trades of `trader_id`, optionally skipping one status.
    fn load_trades_by_trader(
        &self,
        trader_id: &str,
        exclude_status: Option<TradeStatus>,
    ) -> Result<Vec<Trade>>;
}

/// SQLite-backed [`TradeStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database and initialize the schema.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("Trade store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS traders (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                initial_capital TEXT NOT NULL,
                capital TEXT NOT NULL,
                profit TEXT NOT NULL,
                free_slots INTEGER NOT NULL,
                max_slots INTEGER NOT NULL,
                total_reserved_amount TEXT NOT NULL,
                trade_quantity TEXT NOT NULL,
                total_fees TEXT NOT NULL,
                progress_percentage TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_traders_symbol_strategy ON traders(symbol, strategy);

            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                trader_id TEXT NOT NULL REFERENCES traders(id),
                buy_order_id INTEGER NOT NULL,
                sale_order_id INTEGER,
                open_date TEXT NOT NULL,
                close_date TEXT,
                status TEXT NOT NULL,
                detected_price TEXT NOT NULL,
                reserved_amount TEXT NOT NULL,
                quantity TEXT NOT NULL,
                quantity_filled TEXT,
                cost TEXT,
                buy_commission TEXT,
                buy_price TEXT,
                sale_price TEXT,
                sale_fees TEXT,
                profit TEXT,
                duration TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_trader ON trades(trader_id, status);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn trader_from_row(row: &Row<'_>) -> rusqlite::Result<TraderRecord> {
        Ok(TraderRecord {
            id: row.get(0)?,
            symbol: row.get(1)?,
            strategy: parse_column(row, 2)?,
            initial_capital: parse_column(row, 3)?,
            capital: parse_column(row, 4)?,
            profit: parse_column(row, 5)?,
            free_slots: row.get(6)?,
            max_slots: row.get(7)?,
            total_reserved_amount: parse_column(row, 8)?,
            trade_quantity: parse_column(row, 9)?,
            total_fees: parse_column(row, 10)?,
        })
    }

    fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
        Ok(Trade {
            id: row.get(0)?,
            trader_id: row.get(1)?,
            buy_order_id: row.get(2)?,
            sale_order_id: row.get(3)?,
            open_date: parse_date(row, 4)?,
            close_date: parse_optional(row, 5, parse_date)?,
            status: parse_column(row, 6)?,
            detected_price: parse_column(row, 7)?,
            reserved_amount: parse_column(row, 8)?,
            quantity: parse_column(row, 9)?,
            quantity_filled: parse_optional(row, 10, parse_column)?,
            cost: parse_optional(row, 11, parse_column)?,
            buy_commission: parse_optional(row, 12, parse_column)?,
            buy_price: parse_optional(row, 13, parse_column)?,
            sale_price: parse_optional(row, 14, parse_column)?,
            sale_fees: parse_optional(row, 15, parse_column)?,
            profit: parse_optional(row, 16, parse_column)?,
            duration: row.get(17)?,
        })
    }
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&Row<'_>, usize) -> rusqlite::Result<T>,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(_) => parse(row, idx).map(Some),
        None => Ok(None),
    }
}

fn opt_text(value: Option<Decimal>) -> Option<String> {
    value.map(|v| v.to_string())
}

const TRADER_COLUMNS: &str = "id, symbol, strategy, initial_capital, capital, profit, free_slots, \
     max_slots, total_reserved_amount, trade_quantity, total_fees";

const TRADE_COLUMNS: &str = "id, trader_id, buy_order_id, sale_order_id, open_date, close_date, \
     status, detected_price, reserved_amount, quantity, quantity_filled, cost, buy_commission, \
     buy_price, sale_price, sale_fees, profit, duration";

impl TradeStore for SqliteStore {
    fn save_trader(&self, trader: &TraderRecord) -> Result<()> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO traders ({TRADER_COLUMNS}, progress_percentage, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    trader.id,
                    trader.symbol,
                    trader.strategy.as_str(),
                    trader.initial_capital.to_string(),
                    trader.capital.to_string(),
                    trader.profit.to_string(),
                    trader.free_slots,
                    trader.max_slots,
                    trader.total_reserved_amount.to_string(),
                    trader.trade_quantity.to_string(),
                    trader.total_fees.to_string(),
                    trader.progress_percentage().round_dp(4).to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to save trader {}", trader.id))?;
        Ok(())
    }

    fn update_trader(&self, trader: &TraderRecord) -> Result<()> {
        let updated = self
            .conn()?
            .execute(
                r#"
                UPDATE traders SET
                    capital = ?2,
                    profit = ?3,
                    free_slots = ?4,
                    max_slots = ?5,
                    total_reserved_amount = ?6,
                    trade_quantity = ?7,
                    total_fees = ?8,
                    progress_percentage = ?9,
                    updated_at = ?10
                WHERE id = ?1
                "#,
                params![
                    trader.id,
                    trader.capital.to_string(),
                    trader.profit.to_string(),
                    trader.free_slots,
                    trader.max_slots,
                    trader.total_reserved_amount.to_string(),
                    trader.trade_quantity.to_string(),
                    trader.total_fees.to_string(),
                    trader.progress_percentage().round_dp(4).to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to update trader {}", trader.id))?;

        anyhow::ensure!(updated == 1, "Trader {} not found", trader.id);
        Ok(())
    }

    fn load_all_traders(&self) -> Result<Vec<TraderRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRADER_COLUMNS} FROM traders ORDER BY symbol, strategy"
        ))?;
        let traders = stmt
            .query_map([], Self::trader_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load traders")?;
        Ok(traders)
    }

    fn save_trade(&self, trade: &Trade) -> Result<()> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO trades ({TRADE_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                ),
                params![
                    trade.id,
                    trade.trader_id,
                    trade.buy_order_id,
                    trade.sale_order_id,
                    trade.open_date.to_rfc3339(),
                    trade.close_date.map(|d| d.to_rfc3339()),
                    trade.status.as_str(),
                    trade.detected_price.to_string(),
                    trade.reserved_amount.to_string(),
                    trade.quantity.to_string(),
                    opt_text(trade.quantity_filled),
                    opt_text(trade.cost),
                    opt_text(trade.buy_commission),
                    opt_text(trade.buy_price),
                    opt_text(trade.sale_price),
                    opt_text(trade.sale_fees),
                    opt_text(trade.profit),
                    trade.duration,
                ],
            )
            .with_context(|| format!("Failed to save trade {}", trade.id))?;
        Ok(())
    }

    fn update_trade(&self, trade: &Trade) -> Result<()> {
        let updated = self
            .conn()?
            .execute(
                r#"
                UPDATE trades SET
                    sale_order_id = ?2,
                    close_date = ?3,
                    status = ?4,
                    quantity_filled = ?5,
                    cost = ?6,
                    buy_commission = ?7,
                    buy_price = ?8,
                    sale_price = ?9,
                    sale_fees = ?10,
                    profit = ?11,
                    duration = ?12
                WHERE id = ?1
                "#,
                params![
                    trade.id,
                    trade.sale_order_id,
                    trade.close_date.map(|d| d.to_rfc3339()),
                    trade.status.as_str(),
                    opt_text(trade.quantity_filled),
                    opt_text(trade.cost),
                    opt_text(trade.buy_commission),
                    opt_text(trade.buy_price),
                    opt_text(trade.sale_price),
                    opt_text(trade.sale_fees),
                    opt_text(trade.profit),
                    trade.duration,
                ],
            )
            .with_context(|| format!("Failed to update trade {}", trade.id))?;

        anyhow::ensure!(updated == 1, "Trade {} not found", trade.id);
        Ok(())
    }

    fn load_trades_by_trader(
        &self,
        trader_id: &str,
        exclude_status: Option<TradeStatus>,
    ) -> Result<Vec<Trade>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades \
             WHERE trader_id = ?1 AND (?2 IS NULL OR status != ?2) \
             ORDER BY open_date"
        ))?;
        let trades = stmt
            .query_map(
                params![trader_id, exclude_status.map(|s| s.as_str())],
                Self::trade_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to load trades for trader {trader_id}"))?;
        Ok(trades)
    }
}
