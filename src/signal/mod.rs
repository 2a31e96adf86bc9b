//! Signal detection.
//!
//! A detector is bound to one (symbol, strategy) pair. It consumes price
//! updates and kline batches and publishes [`Signal`]s to the traders that
//! subscribed to it.

mod detector;
mod grid;
mod reverse_mean;

pub use detector::{DetectionLogic, SignalDetector};
pub use grid::GridBreakout;
pub use reverse_mean::ReverseMean;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Trading strategy families. Each has a detector and a trader policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Bollinger band mean reversion
    #[serde(alias = "ReverseMeanSignalDetector")]
    ReverseMean,
    /// Grid ladder over the observed price envelope
    #[serde(alias = "GridSignalDetector")]
    Grid,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ReverseMean => "reverse_mean",
            StrategyKind::Grid => "grid",
        }
    }

    pub fn default_max_slots(&self) -> u32 {
        match self {
            StrategyKind::ReverseMean => 1,
            StrategyKind::Grid => 20,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reverse_mean" | "ReverseMeanSignalDetector" => Ok(StrategyKind::ReverseMean),
            "grid" | "GridSignalDetector" => Ok(StrategyKind::Grid),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// What a detector observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Buy { price: Option<Decimal> },
    Sell { price: Option<Decimal> },
    /// Envelope the grid trader should lay its ladder over
    GridConfig { min_price: Decimal, max_price: Decimal },
}

/// A detector output addressed to every trader of the same (symbol, strategy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub detector: StrategyKind,
    pub symbol: Arc<str>,
    pub kind: SignalKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!("grid".parse::<StrategyKind>().unwrap(), StrategyKind::Grid);
        assert_eq!(
            "ReverseMeanSignalDetector".parse::<StrategyKind>().unwrap(),
            StrategyKind::ReverseMean
        );
        assert!("momentum".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::ReverseMean.to_string(), "reverse_mean");
    }

    #[test]
    fn test_strategy_kind_serde_aliases() {
        let kind: StrategyKind = serde_json::from_str("\"GridSignalDetector\"").unwrap();
        assert_eq!(kind, StrategyKind::Grid);
        assert_eq!(serde_json::to_string(&StrategyKind::Grid).unwrap(), "\"grid\"");
    }
}
