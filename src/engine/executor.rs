//! Paired execution: the two-leg saga with compensation.
//!
//! One attempt owns the whole path from sizing to a terminal state. The
//! scan loop never starts a second attempt while one is in flight, so no
//! two compensations can overlap on the same market.
//!
//! The fail-safe ordering invariant: the leg with *less* available depth is
//! bought first. If the harder fill fails, nothing has been bought and the
//! attempt terminates with zero exposure.

use rust_decimal::{Decimal, RoundingStrategy};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::evaluator::MIN_ORDER_NOTIONAL;
use crate::engine::trade::{profit_pct, Trade, TradeKind, TradeStatus};
use crate::exchange::{ExchangeClient, OrderFill, OrderParams, TimeInForce};
use crate::market::{Market, Outcome, PairQuote};

/// Fraction of the lesser side's depth an attempt may consume.
const DEPTH_FRACTION: Decimal = Decimal::from_parts(8, 0, 0, false, 1); // 0.8

/// States of one paired-execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Computing a safe order size.
    Sizing,
    /// Buying the lesser-depth leg.
    BuyFirstLeg,
    /// Terminal: first leg never filled, zero exposure.
    BuyFirstLegFailed,
    /// Buying the opposite leg for the matched quantity.
    BuySecondLeg,
    /// Terminal: both legs confirmed filled.
    BothFilled,
    /// Selling back the already-acquired first leg.
    Unwinding,
    /// Terminal: attempt failed, exposure closed or closing.
    Unwound,
}

/// How an unwind sell ended.
#[derive(Debug, Clone)]
enum UnwindOutcome {
    /// FOK sell filled; proceeds realized.
    Recovered { proceeds: Decimal },
    /// GTC order resting on the book; recovery pending.
    Standing { order_id: String },
    /// Neither sell could be placed.
    Failed,
}

/// A position left over when every sell path failed.
///
/// Handed to the bargain accumulator so it keeps being worked instead of
/// requiring manual intervention.
#[derive(Debug, Clone)]
pub struct OrphanPosition {
    /// Which side is held.
    pub side: Outcome,
    /// Token held.
    pub token_id: String,
    /// Price the leg was bought at.
    pub buy_price: Decimal,
    /// Shares held.
    pub shares: Decimal,
}

/// Terminal result of one attempt.
#[derive(Debug)]
pub struct PairAttemptResult {
    /// Terminal state the attempt reached.
    pub state: AttemptState,
    /// The trade record for the attempt.
    pub trade: Trade,
    /// Share pairs actually acquired, for the merge tracker.
    pub filled_pairs: Decimal,
    /// Surplus position that could not be sold back, if any.
    pub orphan: Option<OrphanPosition>,
}

/// Runs paired-execution attempts against an injected exchange client.
pub struct PairExecutor<'a> {
    client: &'a dyn ExchangeClient,
}

impl<'a> PairExecutor<'a> {
    /// Create an executor over the given client.
    pub fn new(client: &'a dyn ExchangeClient) -> Self {
        Self { client }
    }

    /// Run one attempt from sizing to a terminal state.
    #[instrument(skip(self, market, quote, config), fields(market = %market.slug))]
    pub async fn execute(
        &self,
        market: &Market,
        quote: &PairQuote,
        config: &EngineConfig,
        dry_run: bool,
    ) -> PairAttemptResult {
        let success_status = if dry_run {
            TradeStatus::Simulated
        } else {
            TradeStatus::Executed
        };

        // SIZING
        let size = match size_attempt(quote, config) {
            Ok(size) => size,
            Err(reason) => {
                warn!(reason = %reason, "Sizing rejected attempt");
                return PairAttemptResult {
                    state: AttemptState::Sizing,
                    trade: self.failed_trade(market, quote, Decimal::ZERO, Decimal::ZERO, reason),
                    filled_pairs: Decimal::ZERO,
                    orphan: None,
                };
            }
        };

        // Lesser-depth side first: if it fails, we hold nothing.
        let (first_side, second_side) = if quote.up_depth <= quote.down_depth {
            (Outcome::Up, Outcome::Down)
        } else {
            (Outcome::Down, Outcome::Up)
        };
        let first_price = quote.ask(first_side);
        let second_price = quote.ask(second_side);

        info!(
            size = %size,
            first = %first_side,
            first_price = %first_price,
            second_price = %second_price,
            "Starting paired attempt"
        );

        // BUY_FIRST_LEG: FOK at the evaluated price, then one half retry.
        // The half retry also shrinks the second leg, so the floor check
        // covers both legs' notionals.
        let first_fill = self
            .buy_with_half_retry(
                market.token_id(first_side),
                first_price,
                size,
                |half| half * first_price.min(second_price) >= MIN_ORDER_NOTIONAL,
            )
            .await;

        let first_fill = match first_fill {
            Some(fill) => fill,
            None => {
                info!("First leg not filled, attempt over with zero exposure");
                return PairAttemptResult {
                    state: AttemptState::BuyFirstLegFailed,
                    trade: self.failed_trade(
                        market,
                        quote,
                        Decimal::ZERO,
                        Decimal::ZERO,
                        format!("{first_side} leg not filled (including half retry)"),
                    ),
                    filled_pairs: Decimal::ZERO,
                    orphan: None,
                };
            }
        };

        let matched_target = first_fill.fill_size;

        // BUY_SECOND_LEG: matched quantity, same FOK-then-half-retry.
        let second_fill = self
            .buy_with_half_retry(
                market.token_id(second_side),
                second_price,
                matched_target,
                |half| half * second_price >= MIN_ORDER_NOTIONAL,
            )
            .await;

        match second_fill {
            Some(second) => {
                let matched = first_fill.fill_size.min(second.fill_size);
                let surplus = first_fill.fill_size - matched;

                let mut orphan = None;
                let mut surplus_note = String::new();

                if surplus > Decimal::ZERO {
                    // Half retry filled: pair the half, sell back the rest.
                    crate::metrics::inc_unwinds();
                    let outcome = self
                        .unwind(market.token_id(first_side), first_fill.fill_price, surplus)
                        .await;
                    surplus_note = match outcome {
                        UnwindOutcome::Recovered { proceeds } => {
                            format!(" | surplus {surplus} sold back for ${proceeds}")
                        }
                        UnwindOutcome::Standing { ref order_id } => {
                            format!(" | surplus {surplus} resting as GTC {order_id}")
                        }
                        UnwindOutcome::Failed => {
                            orphan = Some(OrphanPosition {
                                side: first_side,
                                token_id: market.token_id(first_side).to_string(),
                                buy_price: first_fill.fill_price,
                                shares: surplus,
                            });
                            format!(" | surplus {surplus} handed to bargain accumulator")
                        }
                    };
                }

                let (up_price, down_price) = match first_side {
                    Outcome::Up => (first_fill.fill_price, second.fill_price),
                    Outcome::Down => (second.fill_price, first_fill.fill_price),
                };
                let total_cost = up_price + down_price;
                let profit = (Decimal::ONE - total_cost) * matched;

                info!(
                    matched = %matched,
                    total_cost = %total_cost,
                    profit = %profit,
                    "Both legs filled"
                );
                crate::metrics::inc_opportunities_executed();

                PairAttemptResult {
                    state: AttemptState::BothFilled,
                    trade: Trade {
                        timestamp: OffsetDateTime::now_utc(),
                        kind: TradeKind::ArbitragePair,
                        market_slug: market.slug.clone(),
                        up_price,
                        down_price,
                        total_cost,
                        order_size: matched,
                        profit,
                        profit_pct: profit_pct(profit, total_cost * matched),
                        status: success_status,
                        details: format!(
                            "pair filled: UP@{up_price} + DOWN@{down_price} = {total_cost}{surplus_note}"
                        ),
                    },
                    filled_pairs: matched,
                    orphan,
                }
            }
            None => {
                // UNWINDING: close the exposure we are stuck with.
                warn!(
                    held = %first_fill.fill_size,
                    side = %first_side,
                    "Second leg failed twice, unwinding first leg"
                );
                crate::metrics::inc_unwinds();

                let cost = first_fill.fill_price * first_fill.fill_size;
                let outcome = self
                    .unwind(
                        market.token_id(first_side),
                        first_fill.fill_price,
                        first_fill.fill_size,
                    )
                    .await;

                let (profit, orphan, detail) = match outcome {
                    UnwindOutcome::Recovered { proceeds } => (
                        proceeds - cost,
                        None,
                        format!("{second_side} leg failed; sold back for ${proceeds}"),
                    ),
                    UnwindOutcome::Standing { order_id } => (
                        -cost,
                        None,
                        format!(
                            "{second_side} leg failed; GTC recovery order {order_id} resting"
                        ),
                    ),
                    UnwindOutcome::Failed => (
                        -cost,
                        Some(OrphanPosition {
                            side: first_side,
                            token_id: market.token_id(first_side).to_string(),
                            buy_price: first_fill.fill_price,
                            shares: first_fill.fill_size,
                        }),
                        format!(
                            "{second_side} leg failed; sell-back failed, handed to bargain accumulator"
                        ),
                    ),
                };

                let (up_price, down_price) = match first_side {
                    Outcome::Up => (first_fill.fill_price, Decimal::ZERO),
                    Outcome::Down => (Decimal::ZERO, first_fill.fill_price),
                };

                PairAttemptResult {
                    state: AttemptState::Unwound,
                    trade: Trade {
                        timestamp: OffsetDateTime::now_utc(),
                        kind: TradeKind::ArbitragePair,
                        market_slug: market.slug.clone(),
                        up_price,
                        down_price,
                        total_cost: first_fill.fill_price,
                        order_size: first_fill.fill_size,
                        profit,
                        profit_pct: profit_pct(profit, cost),
                        status: TradeStatus::Failed,
                        details: detail,
                    },
                    filled_pairs: Decimal::ZERO,
                    orphan,
                }
            }
        }
    }

    /// FOK buy at the observed price; on failure retry once at half size
    /// unless the half would breach the notional floor.
    async fn buy_with_half_retry(
        &self,
        token_id: &str,
        price: Decimal,
        size: Decimal,
        half_is_allowed: impl Fn(Decimal) -> bool,
    ) -> Option<OrderFill> {
        let params = OrderParams::buy(token_id, price, size);
        match self.client.submit_order(&params).await {
            Ok(fill) if fill.filled => return Some(fill),
            Ok(_) => info!(token = %token_id, size = %size, "FOK killed"),
            Err(e) => warn!(token = %token_id, error = %e, "FOK submission failed"),
        }

        let half = (size / Decimal::TWO).round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if half <= Decimal::ZERO || !half_is_allowed(half) {
            info!(half = %half, "Half retry would breach the notional floor, skipping");
            return None;
        }

        info!(token = %token_id, half = %half, "Retrying at half size");
        let retry = OrderParams::buy(token_id, price, half);
        match self.client.submit_order(&retry).await {
            Ok(fill) if fill.filled => Some(fill),
            Ok(_) => None,
            Err(e) => {
                warn!(token = %token_id, error = %e, "Half retry submission failed");
                None
            }
        }
    }

    /// Sell an acquired leg back: FOK at its fill price, GTC fallback at the
    /// same price so the position cannot stay open indefinitely.
    async fn unwind(&self, token_id: &str, price: Decimal, shares: Decimal) -> UnwindOutcome {
        let fok = OrderParams::sell(token_id, price, shares);
        match self.client.submit_order(&fok).await {
            Ok(fill) if fill.filled => {
                let proceeds = fill.fill_price * fill.fill_size;
                info!(token = %token_id, proceeds = %proceeds, "Unwind FOK filled");
                return UnwindOutcome::Recovered { proceeds };
            }
            Ok(_) => info!(token = %token_id, "Unwind FOK killed, falling back to GTC"),
            Err(e) => warn!(token = %token_id, error = %e, "Unwind FOK failed, falling back to GTC"),
        }

        let gtc = OrderParams::sell(token_id, price, shares).with_tif(TimeInForce::Gtc);
        match self.client.submit_order(&gtc).await {
            Ok(fill) if fill.filled => UnwindOutcome::Recovered {
                proceeds: fill.fill_price * fill.fill_size,
            },
            Ok(fill) => match fill.order_id {
                Some(order_id) => UnwindOutcome::Standing { order_id },
                None => UnwindOutcome::Failed,
            },
            Err(e) => {
                warn!(token = %token_id, error = %e, "Unwind GTC failed");
                UnwindOutcome::Failed
            }
        }
    }

    fn failed_trade(
        &self,
        market: &Market,
        quote: &PairQuote,
        order_size: Decimal,
        profit: Decimal,
        details: String,
    ) -> Trade {
        Trade {
            timestamp: OffsetDateTime::now_utc(),
            kind: TradeKind::ArbitragePair,
            market_slug: market.slug.clone(),
            up_price: quote.up_ask,
            down_price: quote.down_ask,
            total_cost: quote.total_cost(),
            order_size,
            profit,
            profit_pct: Decimal::ZERO,
            status: TradeStatus::Failed,
            details,
        }
    }
}

/// Cap the configured order size to the book and the notional floor.
///
/// The size may consume at most [`DEPTH_FRACTION`] of the lesser side's
/// depth. A size whose cheaper-leg notional would fall below the floor is
/// rejected outright, never rounded up.
fn size_attempt(quote: &PairQuote, config: &EngineConfig) -> Result<Decimal, String> {
    let lesser_depth = quote.up_depth.min(quote.down_depth);
    let cap = (lesser_depth * DEPTH_FRACTION)
        .round_dp_with_strategy(2, RoundingStrategy::ToZero);
    let size = config.order_size.min(cap);

    if size <= Decimal::ZERO {
        return Err(format!("no usable depth (lesser side {lesser_depth})"));
    }

    let cheaper_leg = quote.up_ask.min(quote.down_ask);
    if size * cheaper_leg < MIN_ORDER_NOTIONAL {
        return Err(format!(
            "size {size} x {cheaper_leg} below ${MIN_ORDER_NOTIONAL} notional floor"
        ));
    }

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_engine_config;
    use crate::exchange::{MockExchange, ScriptedFill, Side};
    use rust_decimal_macros::dec;

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

    fn quote(up_ask: Decimal, down_ask: Decimal, up_depth: Decimal, down_depth: Decimal) -> PairQuote {
        PairQuote {
            up_ask,
            down_ask,
            up_depth,
            down_depth,
            fetched_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn sizing_caps_to_depth_fraction() {
        let config = test_engine_config();
        // Lesser depth 40 -> cap 32, below the configured 50
        let size = size_attempt(&quote(dec!(0.48), dec!(0.50), dec!(100), dec!(40)), &config);
        assert_eq!(size.unwrap(), dec!(32));

        // Deep books leave the configured size untouched
        let size = size_attempt(&quote(dec!(0.48), dec!(0.50), dec!(500), dec!(500)), &config);
        assert_eq!(size.unwrap(), dec!(50));
    }

    #[test]
    fn sizing_rejects_sub_floor_notional() {
        let config = test_engine_config();
        // Cap = 1.6 shares, 1.6 x 0.48 = $0.77 < $1
        let result = size_attempt(&quote(dec!(0.48), dec!(0.50), dec!(2), dec!(2)), &config);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn both_legs_fill_cleanly() {
        let mock = MockExchange::new();
        let executor = PairExecutor::new(&mock);
        let config = test_engine_config();

        let result = executor
            .execute(
                &test_market(),
                &quote(dec!(0.48), dec!(0.50), dec!(100), dec!(100)),
                &config,
                false,
            )
            .await;

        assert_eq!(result.state, AttemptState::BothFilled);
        assert_eq!(result.trade.status, TradeStatus::Executed);
        assert_eq!(result.trade.order_size, dec!(50));
        assert_eq!(result.trade.total_cost, dec!(0.98));
        assert_eq!(result.trade.profit, dec!(1.00));
        assert_eq!(result.filled_pairs, dec!(50));
        assert!(result.orphan.is_none());
    }

    #[tokio::test]
    async fn lesser_depth_side_is_bought_first() {
        let mock = MockExchange::new();
        let executor = PairExecutor::new(&mock);
        let config = test_engine_config();

        // DOWN side is thinner, must be the first order submitted
        executor
            .execute(
                &test_market(),
                &quote(dec!(0.48), dec!(0.50), dec!(500), dec!(200)),
                &config,
                false,
            )
            .await;

        let orders = mock.submitted_orders();
        assert_eq!(orders[0].token_id, "down-token");
        assert_eq!(orders[1].token_id, "up-token");
    }

    #[tokio::test]
    async fn first_leg_double_failure_means_zero_exposure() {
        let mock = MockExchange::new();
        mock.script_order("down-token", ScriptedFill::Kill);
        mock.script_order("down-token", ScriptedFill::Kill);
        let executor = PairExecutor::new(&mock);
        let config = test_engine_config();

        let result = executor
            .execute(
                &test_market(),
                &quote(dec!(0.48), dec!(0.50), dec!(500), dec!(200)),
                &config,
                false,
            )
            .await;

        assert_eq!(result.state, AttemptState::BuyFirstLegFailed);
        assert_eq!(result.trade.status, TradeStatus::Failed);
        assert_eq!(result.trade.profit, dec!(0));
        assert_eq!(result.filled_pairs, dec!(0));
        // Two buys on the first leg, nothing else: no exposure, no sells
        assert_eq!(mock.submitted_orders().len(), 2);
        assert!(mock.orders_for("up-token").is_empty());
    }

    #[tokio::test]
    async fn first_leg_half_retry_shrinks_second_leg() {
        let mock = MockExchange::new();
        mock.script_order("down-token", ScriptedFill::Kill);
        let executor = PairExecutor::new(&mock);
        let config = test_engine_config();

        let result = executor
            .execute(
                &test_market(),
                &quote(dec!(0.48), dec!(0.50), dec!(500), dec!(200)),
                &config,
                false,
            )
            .await;

        assert_eq!(result.state, AttemptState::BothFilled);
        assert_eq!(result.trade.order_size, dec!(25));
        assert_eq!(result.filled_pairs, dec!(25));

        let up_orders = mock.orders_for("up-token");
        assert_eq!(up_orders.len(), 1);
        assert_eq!(up_orders[0].size, dec!(25));
    }

    #[tokio::test]
    async fn second_leg_double_failure_sells_first_leg_back() {
        // First leg (DOWN, depth 20) fills at $0.50; UP FOK fails twice;
        // engine sells the DOWN shares back.
        let mock = MockExchange::new();
        mock.script_order("up-token", ScriptedFill::Kill);
        mock.script_order("up-token", ScriptedFill::Kill);
        let executor = PairExecutor::new(&mock);
        let mut config = test_engine_config();
        config.order_size = dec!(20);

        let result = executor
            .execute(
                &test_market(),
                &quote(dec!(0.48), dec!(0.50), dec!(500), dec!(25)),
                &config,
                false,
            )
            .await;

        assert_eq!(result.state, AttemptState::Unwound);
        assert_eq!(result.trade.status, TradeStatus::Failed);
        assert_eq!(result.trade.order_size, dec!(20));
        assert!(result.trade.profit <= dec!(0));
        assert_eq!(result.filled_pairs, dec!(0));

        // Exactly one compensating sell (the FOK recovered at cost)
        let sells: Vec<_> = mock
            .submitted_orders()
            .into_iter()
            .filter(|o| o.side == Side::Sell)
            .collect();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].token_id, "down-token");
        assert_eq!(sells[0].size, dec!(20));
        assert_eq!(sells[0].price, dec!(0.50));
    }

    #[tokio::test]
    async fn unwind_falls_back_to_gtc() {
        let mock = MockExchange::new();
        mock.script_order("up-token", ScriptedFill::Kill);
        mock.script_order("up-token", ScriptedFill::Kill);
        // FOK sell killed, GTC rests
        mock.script_order("down-token", ScriptedFill::Fill); // first leg buy
        // note: buy script consumed first, then sell scripts
        mock.script_order("down-token", ScriptedFill::Kill);
        mock.script_order("down-token", ScriptedFill::Rest);
        let executor = PairExecutor::new(&mock);
        let mut config = test_engine_config();
        config.order_size = dec!(20);

        let result = executor
            .execute(
                &test_market(),
                &quote(dec!(0.48), dec!(0.50), dec!(500), dec!(25)),
                &config,
                false,
            )
            .await;

        assert_eq!(result.state, AttemptState::Unwound);
        assert_eq!(result.trade.status, TradeStatus::Failed);
        // Nothing realized while the GTC rests: full cost recorded as loss
        assert_eq!(result.trade.profit, dec!(-10.00));

        let down_orders = mock.orders_for("down-token");
        assert_eq!(down_orders.len(), 3);
        assert_eq!(down_orders[1].tif, TimeInForce::Fok);
        assert_eq!(down_orders[2].tif, TimeInForce::Gtc);
    }

    #[tokio::test]
    async fn failed_unwind_becomes_orphan() {
        let mock = MockExchange::new();
        mock.script_order("up-token", ScriptedFill::Kill);
        mock.script_order("up-token", ScriptedFill::Kill);
        mock.script_order("down-token", ScriptedFill::Fill); // first leg buy
        mock.script_order("down-token", ScriptedFill::Error("down".to_string()));
        mock.script_order("down-token", ScriptedFill::Error("down".to_string()));
        let executor = PairExecutor::new(&mock);
        let mut config = test_engine_config();
        config.order_size = dec!(20);

        let result = executor
            .execute(
                &test_market(),
                &quote(dec!(0.48), dec!(0.50), dec!(500), dec!(25)),
                &config,
                false,
            )
            .await;

        assert_eq!(result.state, AttemptState::Unwound);
        let orphan = result.orphan.expect("orphan expected");
        assert_eq!(orphan.side, Outcome::Down);
        assert_eq!(orphan.shares, dec!(20));
        assert_eq!(orphan.buy_price, dec!(0.50));
    }

    #[tokio::test]
    async fn dry_run_records_simulated_status() {
        let mock = MockExchange::new();
        let executor = PairExecutor::new(&mock);
        let config = test_engine_config();

        let result = executor
            .execute(
                &test_market(),
                &quote(dec!(0.48), dec!(0.50), dec!(100), dec!(100)),
                &config,
                true,
            )
            .await;

        assert_eq!(result.trade.status, TradeStatus::Simulated);
        // Same control flow: orders went through the (mock) client
        assert_eq!(mock.submitted_orders().len(), 2);
    }
}
