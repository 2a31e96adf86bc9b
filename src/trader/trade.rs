//! A single round trip: limit buy, fill, limit sell, fill.

use crate::utils::decimal::safe_div;
use crate::utils::time::duration_label;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Exchange fee applied to sale proceeds (0.1%).
pub const SALE_FEE_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Trade lifecycle: `BuyOpen -> Filled -> SaleOpen -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    /// Buy order resting on the book
    BuyOpen,
    /// Bought, not yet offered for sale
    Filled,
    /// Sell order resting on the book
    SaleOpen,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::BuyOpen => "BUY_OPEN",
            TradeStatus::Filled => "FILLED",
            TradeStatus::SaleOpen => "SALE_OPEN",
            TradeStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = TradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY_OPEN" => Ok(TradeStatus::BuyOpen),
            "FILLED" => Ok(TradeStatus::Filled),
            "SALE_OPEN" => Ok(TradeStatus::SaleOpen),
            "CLOSED" => Ok(TradeStatus::Closed),
            other => Err(TradeError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeError {
    #[error("trade {trade_id}: cannot {action} from {from}")]
    InvalidTransition {
        trade_id: String,
        from: TradeStatus,
        action: &'static str,
    },

    #[error("unknown trade status '{0}'")]
    UnknownStatus(String),
}

/// Which leg of a trade an order id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeLeg {
    Buy,
    Sale,
}

/// Totals from a `FILLED` buy report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyFill {
    /// Cumulative quote quantity spent
    pub cost: Decimal,
    pub commission: Decimal,
    pub filled_qty: Decimal,
}

/// Totals from a `FILLED` sell report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleFill {
    /// Cumulative quote quantity received
    pub proceeds: Decimal,
    pub filled_qty: Decimal,
}

/// Cash effect of closing a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Proceeds minus sale fees, credited to capital
    pub net_proceeds: Decimal,
    pub profit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub id: String,
    pub trader_id: String,
    pub buy_order_id: i64,
    pub sale_order_id: Option<i64>,
    pub open_date: DateTime<Utc>,
    pub close_date: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    /// Price that triggered the buy
    pub detected_price: Decimal,
    /// Capital held back while the buy order rests
    pub reserved_amount: Decimal,
    pub quantity: Decimal,
    pub quantity_filled: Option<Decimal>,
    pub cost: Option<Decimal>,
    pub buy_commission: Option<Decimal>,
    pub buy_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    pub sale_fees: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub duration: Option<String>,
}

impl Trade {
    /// New trade for a just-placed buy order.
    pub fn open(trader_id: &str, buy_order_id: i64, price: Decimal, quantity: Decimal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trader_id: trader_id.to_string(),
            buy_order_id,
            sale_order_id: None,
            open_date: Utc::now(),
            close_date: None,
            status: TradeStatus::BuyOpen,
            detected_price: price,
            reserved_amount: price * quantity,
            quantity,
            quantity_filled: None,
            cost: None,
            buy_commission: None,
            buy_price: None,
            sale_price: None,
            sale_fees: None,
            profit: None,
            duration: None,
        }
    }

    /// The leg `order_id` refers to, if any.
    pub fn matches_order(&self, order_id: i64) -> Option<TradeLeg> {
        if self.buy_order_id == order_id {
            Some(TradeLeg::Buy)
        } else if self.sale_order_id == Some(order_id) {
            Some(TradeLeg::Sale)
        } else {
            None
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != TradeStatus::Closed
    }

    /// Buy commission valued in the quote asset.
    pub fn fees_to_cover(&self) -> Decimal {
        match (self.buy_commission, self.buy_price) {
            (Some(commission), Some(price)) => commission * price,
            _ => Decimal::ZERO,
        }
    }

    fn transition_error(&self, action: &'static str) -> TradeError {
        TradeError::InvalidTransition {
            trade_id: self.id.clone(),
            from: self.status,
            action,
        }
    }

    /// `BuyOpen -> Filled`.
    pub fn mark_filled(&mut self, fill: BuyFill) -> Result<(), TradeError> {
        if self.status != TradeStatus::BuyOpen {
            return Err(self.transition_error("fill buy"));
        }
        self.cost = Some(fill.cost);
        self.buy_commission = Some(fill.commission);
        self.quantity_filled = Some(fill.filled_qty);
        self.buy_price = Some(safe_div(fill.cost, fill.filled_qty));
        self.status = TradeStatus::Filled;
        Ok(())
    }

    /// `Filled -> SaleOpen`.
    pub fn mark_sale_open(&mut self, sale_order_id: i64) -> Result<(), TradeError> {
        if self.status != TradeStatus::Filled {
            return Err(self.transition_error("open sale"));
        }
        self.sale_order_id = Some(sale_order_id);
        self.status = TradeStatus::SaleOpen;
        Ok(())
    }

    /// `SaleOpen -> Closed`.
    pub fn mark_closed(&mut self, fill: SaleFill, now: DateTime<Utc>) -> Result<Settlement, TradeError> {
        if self.status != TradeStatus::SaleOpen {
            return Err(self.transition_error("close"));
        }
        let cost = self.cost.unwrap_or_default();
        let sale_fees = fill.proceeds * SALE_FEE_RATE;
        let profit = fill.proceeds - cost - sale_fees - self.fees_to_cover();

        self.sale_price = Some(safe_div(fill.proceeds, fill.filled_qty));
        self.sale_fees = Some(sale_fees);
        self.profit = Some(profit);
        self.close_date = Some(now);
        self.duration = Some(duration_label(self.open_date, now));
        self.status = TradeStatus::Closed;

        Ok(Settlement {
            net_proceeds: fill.proceeds - sale_fees,
            profit,
        })
    }
}
