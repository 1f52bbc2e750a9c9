//! Opportunity evaluation: prices in, go/no-go plus sizing out.

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::trade::profit_pct;
use crate::market::{Market, PairQuote};

/// Exchange-imposed minimum notional per leg in USD.
pub const MIN_ORDER_NOTIONAL: Decimal = Decimal::ONE;

/// Per-market trading history the evaluator gates on.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketTradeStats {
    /// Trades recorded on this market so far.
    pub trades: u32,
    /// When the last trade on this market completed.
    pub last_trade_at: Option<OffsetDateTime>,
}

/// A derived, per-cycle viability decision. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PairOpportunity {
    /// Market under evaluation.
    pub market_slug: String,
    /// Combined ask cost per share pair.
    pub total_cost: Decimal,
    /// Edge versus the configured target cost.
    pub spread: Decimal,
    /// Profit at the configured order size if both legs fill.
    pub potential_profit: Decimal,
    /// Profit as a percentage of invested capital.
    pub profit_pct: Decimal,
    /// Whether the opportunity passes every gate.
    pub viable: bool,
    /// First gate that failed, or the go message.
    pub reason: String,
}

/// Evaluate one market's current quote against the configured gates.
///
/// Gates run in order and the first failure supplies the reason. Boundary
/// equality with the target cost is non-viable: after rounding, trading at
/// the boundary has zero or negative edge.
pub fn evaluate(
    market: &Market,
    quote: &PairQuote,
    config: &EngineConfig,
    stats: &MarketTradeStats,
) -> PairOpportunity {
    let total_cost = quote.total_cost();
    let spread = config.target_pair_cost - total_cost;
    let potential_profit = config.order_size * (Decimal::ONE - total_cost);
    let pct = profit_pct(potential_profit, config.order_size * total_cost);

    let now = OffsetDateTime::now_utc();
    let cheaper_leg = quote.up_ask.min(quote.down_ask);
    let time_remaining = market.time_remaining_seconds();

    let cooldown_remaining = stats.last_trade_at.map(|last| {
        config.trade_cooldown_seconds as i64 - (now - last).whole_seconds()
    });

    let failure = if total_cost >= config.target_pair_cost {
        Some(format!(
            "total cost {total_cost} >= target {}",
            config.target_pair_cost
        ))
    } else if quote.up_ask <= Decimal::ZERO || quote.down_ask <= Decimal::ZERO {
        Some("invalid price data".to_string())
    } else if time_remaining < config.min_time_remaining_seconds {
        Some(format!("only {time_remaining}s remaining"))
    } else if stats.trades >= config.max_trades_per_market {
        Some(format!(
            "per-market trade cap reached ({})",
            config.max_trades_per_market
        ))
    } else if matches!(cooldown_remaining, Some(r) if r > 0) {
        Some(format!(
            "cooldown active ({}s remaining)",
            cooldown_remaining.unwrap_or(0)
        ))
    } else if quote.up_depth < config.min_liquidity || quote.down_depth < config.min_liquidity {
        Some(format!(
            "insufficient depth (UP: {}, DOWN: {})",
            quote.up_depth, quote.down_depth
        ))
    } else if config.order_size * cheaper_leg < MIN_ORDER_NOTIONAL {
        Some(format!(
            "cheaper leg notional below ${MIN_ORDER_NOTIONAL} ({} x {cheaper_leg})",
            config.order_size
        ))
    } else {
        None
    };

    let (viable, reason) = match failure {
        Some(reason) => {
            debug!(market = %market.slug, %total_cost, reason = %reason, "Not viable");
            (false, reason)
        }
        None => {
            let reason = format!("profit ${potential_profit} ({pct:.2}%)");
            info!(
                market = %market.slug,
                %total_cost,
                profit = %potential_profit,
                "Arbitrage opportunity"
            );
            (true, reason)
        }
    };

    PairOpportunity {
        market_slug: market.slug.clone(),
        total_cost,
        spread,
        potential_profit,
        profit_pct: pct,
        viable,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_engine_config;
    use rust_decimal_macros::dec;
    use time::Duration;

    fn test_market() -> Market {
        Market {
            condition_id: "0xc0ffee".to_string(),
            slug: "btc-updown-15m-123".to_string(),
            symbol: "btc".to_string(),
            up_token_id: "up-token".to_string(),
            down_token_id: "down-token".to_string(),
            end_timestamp: OffsetDateTime::now_utc().unix_timestamp() + 600,
            question: None,
        }
    }

    fn quote(up_ask: Decimal, down_ask: Decimal, depth: Decimal) -> PairQuote {
        PairQuote {
            up_ask,
            down_ask,
            up_depth: depth,
            down_depth: depth,
            fetched_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn cheap_pair_with_depth_is_viable() {
        // UP $0.48 + DOWN $0.50 at target $0.99, size 50, depth 100
        let config = test_engine_config();
        let opp = evaluate(
            &test_market(),
            &quote(dec!(0.48), dec!(0.50), dec!(100)),
            &config,
            &MarketTradeStats::default(),
        );

        assert!(opp.viable);
        assert_eq!(opp.total_cost, dec!(0.98));
        assert_eq!(opp.potential_profit, dec!(1.00));
        assert_eq!(opp.spread, dec!(0.01));
    }

    #[test]
    fn boundary_equality_is_never_viable() {
        let config = test_engine_config();
        let opp = evaluate(
            &test_market(),
            &quote(dec!(0.49), dec!(0.50), dec!(100)),
            &config,
            &MarketTradeStats::default(),
        );

        assert!(!opp.viable);
        assert!(opp.reason.contains(">= target"));
    }

    #[test]
    fn thin_depth_fails() {
        let config = test_engine_config();
        let opp = evaluate(
            &test_market(),
            &quote(dec!(0.48), dec!(0.50), dec!(50)),
            &config,
            &MarketTradeStats::default(),
        );

        assert!(!opp.viable);
        assert!(opp.reason.contains("insufficient depth"));
    }

    #[test]
    fn expiring_market_fails() {
        let config = test_engine_config();
        let mut market = test_market();
        market.end_timestamp = OffsetDateTime::now_utc().unix_timestamp() + 30;

        let opp = evaluate(
            &market,
            &quote(dec!(0.48), dec!(0.50), dec!(100)),
            &config,
            &MarketTradeStats::default(),
        );

        assert!(!opp.viable);
        assert!(opp.reason.contains("remaining"));
    }

    #[test]
    fn trade_cap_fails() {
        let config = test_engine_config();
        let stats = MarketTradeStats {
            trades: config.max_trades_per_market,
            last_trade_at: None,
        };

        let opp = evaluate(
            &test_market(),
            &quote(dec!(0.48), dec!(0.50), dec!(100)),
            &config,
            &stats,
        );

        assert!(!opp.viable);
        assert!(opp.reason.contains("cap reached"));
    }

    #[test]
    fn cooldown_fails_until_elapsed() {
        let config = test_engine_config();
        let fresh = MarketTradeStats {
            trades: 1,
            last_trade_at: Some(OffsetDateTime::now_utc() - Duration::seconds(10)),
        };

        let opp = evaluate(
            &test_market(),
            &quote(dec!(0.48), dec!(0.50), dec!(100)),
            &config,
            &fresh,
        );
        assert!(!opp.viable);
        assert!(opp.reason.contains("cooldown"));

        let elapsed = MarketTradeStats {
            trades: 1,
            last_trade_at: Some(
                OffsetDateTime::now_utc()
                    - Duration::seconds(config.trade_cooldown_seconds as i64 + 5),
            ),
        };

        let opp = evaluate(
            &test_market(),
            &quote(dec!(0.48), dec!(0.50), dec!(100)),
            &config,
            &elapsed,
        );
        assert!(opp.viable);
    }

    #[test]
    fn sub_dollar_notional_fails() {
        let mut config = test_engine_config();
        config.order_size = dec!(2);
        config.min_liquidity = dec!(1);

        // 2 shares x $0.30 = $0.60 on the cheaper leg
        let opp = evaluate(
            &test_market(),
            &quote(dec!(0.30), dec!(0.60), dec!(100)),
            &config,
            &MarketTradeStats::default(),
        );

        assert!(!opp.viable);
        assert!(opp.reason.contains("notional"));
    }
}
