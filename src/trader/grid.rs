//! Grid trading policy.
//!
//! The ladder spans the envelope published by the grid detector. Each cell
//! holds at most one trade: bought when price drops below the cell, sold
//! once price climbs above it.

use super::engine::{Policy, Trader};
use super::trade::{Trade, TradeStatus};
use crate::indicators::{grid_levels, IndicatorError, PriceEnvelope};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One rung of the ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    pub id: String,
    /// Lower edge
    pub start: Decimal,
    /// Upper edge
    pub end: Decimal,
    /// Whether the last observed price fell inside `[start, end]`
    pub in_price_range: bool,
}

/// Decision taken for one cell on a price update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridAction {
    Open { cell_id: String },
    Close { cell_id: String, trade_id: String },
}

/// Ladder plus the cell -> trade mapping.
#[derive(Debug)]
pub struct GridBook {
    gap: Decimal,
    max_trades: usize,
    envelope: Option<PriceEnvelope>,
    cells: Vec<GridCell>,
    assignments: HashMap<String, String>,
}

impl GridBook {
    pub fn new(gap: Decimal, max_trades: usize) -> Self {
        Self {
            gap,
            max_trades,
            envelope: None,
            cells: Vec::new(),
            assignments: HashMap::new(),
        }
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn envelope(&self) -> Option<&PriceEnvelope> {
        self.envelope.as_ref()
    }

    /// Trade currently mapped to `cell_id`.
    pub fn assignment(&self, cell_id: &str) -> Option<&str> {
        self.assignments.get(cell_id).map(String::as_str)
    }

    pub fn assign(&mut self, cell_id: &str, trade_id: String) {
        self.assignments.insert(cell_id.to_string(), trade_id);
    }

    pub fn release(&mut self, cell_id: &str) {
        self.assignments.remove(cell_id);
    }

    /// Rebuild the ladder when `[min_price, max_price]` widens the stored
    /// envelope. Returns whether a rebuild happened.
    pub fn apply_config(
        &mut self,
        min_price: Decimal,
        max_price: Decimal,
        open_trades: &[Trade],
    ) -> Result<bool, IndicatorError> {
        let incoming = PriceEnvelope { min_price, max_price };
        let envelope = match self.envelope {
            None => incoming,
            Some(stored) if stored.is_widened_by(&incoming) => PriceEnvelope {
                min_price: stored.min_price.min(min_price),
                max_price: stored.max_price.max(max_price),
            },
            Some(_) => return Ok(false),
        };

        let levels = grid_levels(envelope.min_price, envelope.max_price, self.gap)?;
        let previous = self.assigned_bounds();
        self.cells = levels
            .into_iter()
            .map(|level| GridCell {
                id: Uuid::new_v4().to_string(),
                start: level.start,
                end: level.end,
                in_price_range: false,
            })
            .collect();
        self.envelope = Some(envelope);
        self.assignments.clear();
        self.adopt(open_trades, &previous);
        Ok(true)
    }

    /// `[start, end]` of the cell each mapped trade currently occupies.
    fn assigned_bounds(&self) -> HashMap<String, (Decimal, Decimal)> {
        self.cells
            .iter()
            .filter_map(|cell| {
                self.assignments
                    .get(&cell.id)
                    .map(|trade_id| (trade_id.clone(), (cell.start, cell.end)))
            })
            .collect()
    }

    /// Map open trades onto the rebuilt ladder.
    ///
    /// A trade that held a cell before the rebuild keeps the cell with the
    /// same edges, or the one containing its old lower edge. Trades with no
    /// prior cell (restored from storage) take the cell just above their
    /// entry price.
    fn adopt(&mut self, open_trades: &[Trade], previous: &HashMap<String, (Decimal, Decimal)>) {
        let mut trades: Vec<&Trade> = open_trades.iter().collect();
        trades.sort_by_key(|t| (!previous.contains_key(&t.id), t.open_date));

        for trade in trades {
            let cell = match previous.get(&trade.id) {
                Some(&(start, end)) => self
                    .cells
                    .iter()
                    .find(|c| c.start == start && c.end == end)
                    .or_else(|| self.cells.iter().find(|c| c.start <= start && start < c.end)),
                None => self
                    .cells
                    .iter()
                    .filter(|c| c.start > trade.detected_price)
                    .min_by_key(|c| c.start),
            };

            match cell {
                Some(cell) if !self.assignments.contains_key(&cell.id) => {
                    debug!(trade_id = %trade.id, cell_start = %cell.start, "Trade adopted by grid cell");
                    self.assignments.insert(cell.id.clone(), trade.id.clone());
                }
                _ => warn!(trade_id = %trade.id, price = %trade.detected_price, "Open trade has no free grid cell"),
            }
        }
    }

    /// Actions for `price`, judged on the cells that held the previous price.
    pub fn plan(&self, price: Decimal, open_trades: &[Trade]) -> Vec<GridAction> {
        let mut budget = self.max_trades.saturating_sub(open_trades.len());
        let mut actions = Vec::new();

        for cell in self.cells.iter().filter(|c| c.in_price_range) {
            let mapped = self
                .assignments
                .get(&cell.id)
                .and_then(|trade_id| open_trades.iter().find(|t| &t.id == trade_id));

            match mapped {
                None if price < cell.start && budget > 0 => {
                    budget -= 1;
                    actions.push(GridAction::Open {
                        cell_id: cell.id.clone(),
                    });
                }
                Some(trade) if price > cell.end && trade.status == TradeStatus::Filled => {
                    actions.push(GridAction::Close {
                        cell_id: cell.id.clone(),
                        trade_id: trade.id.clone(),
                    });
                }
                _ => {}
            }
        }

        actions
    }

    pub fn refresh_ranges(&mut self, price: Decimal) {
        for cell in &mut self.cells {
            cell.in_price_range = cell.start <= price && price <= cell.end;
        }
    }
}

impl Trader {
    pub(super) fn apply_grid_config(&mut self, min_price: Decimal, max_price: Decimal) {
        let Policy::Grid(book) = &mut self.policy else {
            return;
        };

        match book.apply_config(min_price, max_price, &self.current_trades) {
            Ok(true) => info!(
                trader_id = %self.id,
                %min_price,
                %max_price,
                cells = book.cells().len(),
                "Grid rebuilt"
            ),
            Ok(false) => debug!(trader_id = %self.id, "Grid envelope unchanged"),
            Err(e) => warn!(trader_id = %self.id, error = %e, "Grid config rejected"),
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

    fn grid_signal(min: Decimal, max: Decimal) -> Signal {
        Signal {
            detector: StrategyKind::Grid,
            symbol: Arc::from("BTCUSDT"),
            kind: SignalKind::GridConfig { min_price: min, max_price: max },
        }
    }

    fn book(trader: &Trader) -> &GridBook {
        match &trader.policy {
            Policy::Grid(book) => book,
            Policy::ReverseMean => panic!("not a grid trader"),
        }
    }

    #[test]
    fn test_ladder_covers_envelope() {
        let mut book = GridBook::new(dec!(10), 20);
        assert!(book.apply_config(dec!(90), dec!(130), &[]).unwrap());

        let edges: Vec<(Decimal, Decimal)> = book.cells().iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(
            edges,
            vec![
                (dec!(120), dec!(130)),
                (dec!(110), dec!(120)),
                (dec!(100), dec!(110)),
                (dec!(90), dec!(100)),
            ]
        );
    }

    #[test]
    fn test_rebuild_only_when_widened() {
        let mut book = GridBook::new(dec!(10), 20);
        book.apply_config(dec!(90), dec!(130), &[]).unwrap();
        let first_id = book.cells()[0].id.clone();

        assert!(!book.apply_config(dec!(90), dec!(130), &[]).unwrap());
        assert!(!book.apply_config(dec!(95), dec!(125), &[]).unwrap());
        assert_eq!(book.cells()[0].id, first_id);

        assert!(book.apply_config(dec!(80), dec!(130), &[]).unwrap());
        assert_eq!(book.cells().len(), 5);
        assert_eq!(book.envelope().unwrap().min_price, dec!(80));
    }

    #[test]
    fn test_open_trades_adopted_on_rebuild() {
        let trade = Trade::open("t", 1, dec!(105), dec!(1));
        let mut book = GridBook::new(dec!(10), 20);
        book.apply_config(dec!(90), dec!(130), std::slice::from_ref(&trade)).unwrap();

        let cell = book.cells().iter().find(|c| c.start == dec!(110)).unwrap();
        assert_eq!(book.assignment(&cell.id), Some(trade.id.as_str()));
    }

    #[test]
    fn test_rebuild_keeps_cell_of_mapped_trade() {
        let trade = Trade::open("t", 1, dec!(95), dec!(1));
        let mut book = GridBook::new(dec!(10), 20);
        book.apply_config(dec!(90), dec!(130), &[]).unwrap();
        let held = book.cells().iter().find(|c| c.start == dec!(110)).unwrap().id.clone();
        book.assign(&held, trade.id.clone());

        book.apply_config(dec!(80), dec!(130), std::slice::from_ref(&trade)).unwrap();

        let cell = book.cells().iter().find(|c| c.start == dec!(110)).unwrap();
        assert_eq!(cell.end, dec!(120));
        assert_eq!(book.assignment(&cell.id), Some(trade.id.as_str()));
        let below = book.cells().iter().find(|c| c.start == dec!(100)).unwrap();
        assert_eq!(book.assignment(&below.id), None);
    }

    #[test]
    fn test_rebuild_falls_back_to_cell_containing_old_start() {
        let trade = Trade::open("t", 1, dec!(95), dec!(1));
        let mut book = GridBook::new(dec!(10), 20);
        book.apply_config(dec!(90), dec!(130), &[]).unwrap();
        let held = book.cells().iter().find(|c| c.start == dec!(110)).unwrap().id.clone();
        book.assign(&held, trade.id.clone());

        // Widening the top by a non-multiple of the gap shifts every edge.
        book.apply_config(dec!(90), dec!(135), std::slice::from_ref(&trade)).unwrap();

        let cell = book
            .cells()
            .iter()
            .find(|c| c.start <= dec!(110) && dec!(110) < c.end)
            .unwrap();
        assert_eq!(book.assignment(&cell.id), Some(trade.id.as_str()));
    }

    #[test]
    fn test_plan_uses_previous_ranges() {
        let mut book = GridBook::new(dec!(10), 20);
        book.apply_config(dec!(90), dec!(130), &[]).unwrap();

        // No cell held the previous price yet.
        assert!(book.plan(dec!(105), &[]).is_empty());

        book.refresh_ranges(dec!(112));
        let actions = book.plan(dec!(108), &[]);
        assert_eq!(actions.len(), 1);
        let GridAction::Open { cell_id } = &actions[0] else {
            panic!("expected open");
        };
        let cell = book.cells().iter().find(|c| &c.id == cell_id).unwrap();
        assert_eq!(cell.start, dec!(110));
    }

    #[test]
    fn test_plan_respects_trade_cap() {
        let mut book = GridBook::new(dec!(10), 1);
        book.apply_config(dec!(90), dec!(130), &[]).unwrap();
        book.refresh_ranges(dec!(112));

        let busy = vec![Trade::open("t", 1, dec!(50), dec!(1))];
        assert!(book.plan(dec!(108), &busy).is_empty());
    }

    #[tokio::test]
    async fn test_grid_round_trip_through_trader() {
        let mut trader = trader(StrategyKind::Grid);
        trader.on_signal(&grid_signal(dec!(90), dec!(130))).await;
        assert_eq!(book(&trader).cells().len(), 4);

        // Enter [110, 120], then drop below it.
        trader.on_price(dec!(115)).await;
        assert!(trader.current_trades.is_empty());
        trader.on_price(dec!(109)).await;
        assert_eq!(trader.current_trades.len(), 1);
        let trade_id = trader.current_trades[0].id.clone();
        assert_eq!(trader.current_trades[0].detected_price, dec!(109));

        let cell_id = book(&trader)
            .cells()
            .iter()
            .find(|c| c.start == dec!(110))
            .map(|c| c.id.clone())
            .unwrap();
        assert_eq!(book(&trader).assignment(&cell_id), Some(trade_id.as_str()));

        // Same cell does not open twice while mapped.
        trader.on_price(dec!(115)).await;
        trader.on_price(dec!(108)).await;
        assert_eq!(trader.current_trades.len(), 1);

        trader.on_execution_report(&report(1, OrderSide::Buy, dec!(1), dec!(109), Decimal::ZERO));

        // Back into the cell, then above its upper edge.
        trader.on_price(dec!(115)).await;
        trader.on_price(dec!(121)).await;
        assert_eq!(trader.current_trades[0].status, TradeStatus::SaleOpen);
        assert_eq!(book(&trader).assignment(&cell_id), None);
    }

    #[tokio::test]
    async fn test_widening_keeps_trade_in_its_cell() {
        let mut trader = trader(StrategyKind::Grid);
        trader.on_signal(&grid_signal(dec!(90), dec!(130))).await;

        // Enter [110, 120], then gap down well below it.
        trader.on_price(dec!(115)).await;
        trader.on_price(dec!(95)).await;
        assert_eq!(trader.current_trades.len(), 1);
        let trade_id = trader.current_trades[0].id.clone();

        trader.on_signal(&grid_signal(dec!(80), dec!(130))).await;
        assert_eq!(book(&trader).cells().len(), 5);
        let cell_id = book(&trader)
            .cells()
            .iter()
            .find(|c| c.start == dec!(110) && c.end == dec!(120))
            .map(|c| c.id.clone())
            .unwrap();
        assert_eq!(book(&trader).assignment(&cell_id), Some(trade_id.as_str()));

        // The cell is still taken, so no second trade opens there.
        trader.on_price(dec!(115)).await;
        trader.on_price(dec!(109)).await;
        assert_eq!(trader.current_trades.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_envelope_rejected() {
        let mut trader = trader(StrategyKind::Grid);
        trader.on_signal(&grid_signal(dec!(0), dec!(100000))).await;
        assert!(book(&trader).cells().is_empty());
        assert!(book(&trader).envelope().is_none());

        trader.on_signal(&grid_signal(dec!(90), dec!(130))).await;
        assert_eq!(book(&trader).cells().len(), 4);
    }

    #[tokio::test]
    async fn test_buy_signal_ignored_by_grid_trader() {
        let mut trader = trader(StrategyKind::Grid);
        trader.on_price(dec!(100)).await;
        let buy = Signal {
            detector: StrategyKind::Grid,
            symbol: Arc::from("BTCUSDT"),
            kind: SignalKind::Buy { price: Some(dec!(100)) },
        };
        trader.on_signal(&buy).await;
        assert!(trader.current_trades.is_empty());
    }
}
