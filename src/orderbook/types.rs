//! Order book types and data structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::market::Outcome;

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total size available at this price.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Number of top ask levels counted towards a side's quoted depth.
pub const DEPTH_LEVELS: usize = 5;

/// L2 order book for one outcome token.
#[derive(Debug, Clone)]
pub struct OutcomeBook {
    /// Token ID this book represents.
    pub token_id: String,
    /// Which outcome (Up or Down).
    pub outcome: Outcome,
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
    /// When this book was last fetched.
    pub updated_at: OffsetDateTime,
}

impl Default for OutcomeBook {
    fn default() -> Self {
        Self {
            token_id: String::new(),
            outcome: Outcome::default(),
            bids: Vec::new(),
            asks: Vec::new(),
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

impl OutcomeBook {
    /// Get the best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Get the best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Depth counted over the top [`DEPTH_LEVELS`] ask levels.
    ///
    /// This is the figure the evaluator compares against `min_liquidity`;
    /// deeper levels are too far from the quoted price to count.
    pub fn ask_depth(&self) -> Decimal {
        self.asks
            .iter()
            .take(DEPTH_LEVELS)
            .map(|l| l.size)
            .sum()
    }

    /// Total liquidity on the bid side.
    pub fn total_bid_liquidity(&self) -> Decimal {
        self.bids.iter().map(|l| l.size).sum()
    }

    /// Check if the book is inverted (best_ask < best_bid).
    pub fn is_inverted(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask < bid,
            _ => false,
        }
    }

    /// A book with no asks, or only zero-size asks, cannot be traded against.
    pub fn has_asks(&self) -> bool {
        self.asks.iter().any(|l| l.size > Decimal::ZERO)
    }
}

/// Result of walking the ask book for a target size.
#[derive(Debug, Clone)]
pub struct FillInfo {
    /// Total size that can be filled.
    pub filled_size: Decimal,
    /// Total cost to fill.
    pub total_cost: Decimal,
    /// Volume-weighted average price.
    pub vwap: Decimal,
    /// Worst price encountered (highest for buys).
    pub worst_price: Decimal,
    /// Best price available.
    pub best_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> OutcomeBook {
        OutcomeBook {
            token_id: "test".to_string(),
            outcome: Outcome::Up,
            bids: bids.into_iter().map(|(p, s)| PriceLevel::new(p, s)).collect(),
            asks: asks.into_iter().map(|(p, s)| PriceLevel::new(p, s)).collect(),
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn best_prices() {
        let b = book(
            vec![(dec!(0.48), dec!(50)), (dec!(0.47), dec!(100))],
            vec![(dec!(0.50), dec!(50)), (dec!(0.51), dec!(100))],
        );

        assert_eq!(b.best_bid(), Some(dec!(0.48)));
        assert_eq!(b.best_ask(), Some(dec!(0.50)));
    }

    #[test]
    fn ask_depth_counts_top_levels_only() {
        let asks: Vec<(Decimal, Decimal)> = (0..8)
            .map(|i| (Decimal::new(50 + i, 2), dec!(10)))
            .collect();
        let b = book(vec![], asks);

        // 5 levels of 10, the remaining 3 are ignored
        assert_eq!(b.ask_depth(), dec!(50));
    }

    #[test]
    fn detects_inverted_book() {
        let inverted = book(vec![(dec!(0.52), dec!(50))], vec![(dec!(0.50), dec!(50))]);
        assert!(inverted.is_inverted());

        let normal = book(vec![(dec!(0.48), dec!(50))], vec![(dec!(0.50), dec!(50))]);
        assert!(!normal.is_inverted());
    }

    #[test]
    fn zero_size_asks_are_not_tradeable() {
        let empty = book(vec![], vec![]);
        assert!(!empty.has_asks());

        let zeroed = book(vec![], vec![(dec!(0.50), dec!(0))]);
        assert!(!zeroed.has_asks());

        let live = book(vec![], vec![(dec!(0.50), dec!(10))]);
        assert!(live.has_asks());
    }
}
