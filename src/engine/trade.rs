//! Append-only trade records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// What kind of action a trade records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
pub enum TradeKind {
    /// Both legs of an arbitrage pair.
    #[strum(serialize = "arbitrage-pair")]
    ArbitragePair,
    /// Single-leg bargain open.
    #[strum(serialize = "bargain-open")]
    BargainOpen,
    /// Bargain holding paired with the opposite side.
    #[strum(serialize = "bargain-pair")]
    BargainPair,
    /// Bargain holding sold at a loss.
    #[strum(serialize = "bargain-stop-loss")]
    BargainStopLoss,
}

/// Terminal status of a trade.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// All intended legs confirmed filled.
    #[strum(serialize = "executed")]
    Executed,
    /// Dry-run: decision logic ran, no order hit the network.
    #[strum(serialize = "simulated")]
    Simulated,
    /// Attempt failed; any realized loss is in `profit`.
    #[strum(serialize = "failed")]
    Failed,
}

/// One executed, simulated, or failed action. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// When the trade reached its terminal state.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// What kind of action this was.
    pub kind: TradeKind,
    /// Market the trade happened on.
    pub market_slug: String,
    /// UP-side price involved (zero when only DOWN traded).
    pub up_price: Decimal,
    /// DOWN-side price involved (zero when only UP traded).
    pub down_price: Decimal,
    /// Combined cost per share pair, or the single-leg price.
    pub total_cost: Decimal,
    /// Shares per leg.
    pub order_size: Decimal,
    /// Expected profit for executed/simulated trades, realized loss (≤ 0)
    /// for failed ones.
    pub profit: Decimal,
    /// Profit as a percentage of invested capital.
    pub profit_pct: Decimal,
    /// Terminal status.
    pub status: TradeStatus,
    /// Human-readable context.
    pub details: String,
}

impl Trade {
    /// Whether this trade counts towards realized/expected profit totals.
    pub fn counts_towards_profit(&self) -> bool {
        matches!(self.status, TradeStatus::Executed | TradeStatus::Simulated)
    }
}

/// Profit percentage relative to invested capital, zero-safe.
pub fn profit_pct(profit: Decimal, invested: Decimal) -> Decimal {
    if invested > Decimal::ZERO {
        profit / invested * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn kinds_serialize_kebab_case() {
        let json = serde_json::to_string(&TradeKind::BargainStopLoss).unwrap();
        assert_eq!(json, r#""bargain-stop-loss""#);

        let back: TradeKind = serde_json::from_str(r#""arbitrage-pair""#).unwrap();
        assert_eq!(back, TradeKind::ArbitragePair);
    }

    #[test]
    fn profit_counting_by_status() {
        let mut trade = Trade {
            timestamp: OffsetDateTime::UNIX_EPOCH,
            kind: TradeKind::ArbitragePair,
            market_slug: "btc-updown-15m-1".to_string(),
            up_price: dec!(0.48),
            down_price: dec!(0.50),
            total_cost: dec!(0.98),
            order_size: dec!(50),
            profit: dec!(1),
            profit_pct: dec!(2.04),
            status: TradeStatus::Executed,
            details: String::new(),
        };

        assert!(trade.counts_towards_profit());
        trade.status = TradeStatus::Simulated;
        assert!(trade.counts_towards_profit());
        trade.status = TradeStatus::Failed;
        assert!(!trade.counts_towards_profit());
    }

    #[test]
    fn profit_pct_is_zero_safe() {
        assert_eq!(profit_pct(dec!(1), dec!(49)), dec!(1) / dec!(49) * dec!(100));
        assert_eq!(profit_pct(dec!(1), dec!(0)), dec!(0));
    }
}
