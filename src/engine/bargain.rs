//! Bargain accumulation: buy single cheap legs, pair them later or stop out.
//!
//! Rounds stack with a descending ceiling: round 1 opens below the
//! configured threshold, each later round only below the previous round's
//! buy price. A holding pairs once the opposite side gets cheap enough that
//! the combined historical cost clears the pairing threshold. A holding that
//! keeps falling arms a stop-loss which is deferred by a configurable delay
//! so transient dips don't force a sale.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::executor::OrphanPosition;
use crate::engine::trade::{profit_pct, Trade, TradeKind, TradeStatus};
use crate::exchange::{ExchangeClient, OrderParams, TimeInForce};
use crate::market::{Market, Outcome, PairQuote};

/// Lifecycle of a bargain holding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum HoldingStatus {
    /// Open, waiting for a pairing or a stop.
    #[default]
    #[strum(serialize = "holding")]
    Holding,
    /// Matched with the opposite side.
    #[strum(serialize = "paired")]
    Paired,
    /// Sold through the stop-loss.
    #[strum(serialize = "stopped")]
    Stopped,
}

/// A single open leg bought under the bargain strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargainHolding {
    /// Market the leg belongs to.
    pub market_slug: String,
    /// Merge key for the market.
    pub condition_id: String,
    /// Which side is held.
    pub side: Outcome,
    /// Token held.
    pub token_id: String,
    /// The opposite side's token, for pairing.
    pub complement_token_id: String,
    /// Fill price of the buy.
    pub buy_price: Decimal,
    /// Shares held.
    pub shares: Decimal,
    /// USD spent on the buy.
    pub amount_usd: Decimal,
    /// Accumulation round this buy belongs to.
    pub round: u32,
    /// Lifecycle status.
    pub status: HoldingStatus,
    /// When the leg was bought.
    #[serde(with = "time::serde::rfc3339")]
    pub opened_at: OffsetDateTime,
    /// When the stop-loss armed, if it has.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub stop_armed_at: Option<OffsetDateTime>,
}

impl BargainHolding {
    /// Price at or below which the stop arms and, after the deferral, fires.
    pub fn stop_trigger_price(&self, config: &EngineConfig) -> Decimal {
        self.buy_price - config.bargain_stop_loss_cents
    }
}

/// A buy the accumulator wants to make this cycle.
#[derive(Debug, Clone)]
pub struct BargainSignal {
    /// Target market.
    pub market: Market,
    /// Side to buy.
    pub side: Outcome,
    /// Observed ask to buy at.
    pub ask: Decimal,
    /// Round this buy belongs to.
    pub round: u32,
    /// Index into the holdings of the leg this buy would pair with.
    pub pairs_with: Option<usize>,
}

/// A completed pairing, to be fed into the merge tracker.
#[derive(Debug, Clone)]
pub struct CompletedPair {
    /// Merge key.
    pub condition_id: String,
    /// Market the pair belongs to.
    pub market_slug: String,
    /// Matched shares on each side.
    pub shares: Decimal,
}

/// Result of executing one bargain signal.
#[derive(Debug)]
pub struct BargainActionResult {
    /// The recorded trade (open or pair).
    pub trade: Trade,
    /// Set when the buy completed a pair.
    pub completed_pair: Option<CompletedPair>,
}

/// A stop-loss that fired, with what left the balance sheet.
#[derive(Debug)]
pub struct StopResult {
    /// The recorded stop-loss trade.
    pub trade: Trade,
    /// Market the holding belonged to.
    pub market_slug: String,
    /// Side that was sold.
    pub side: Outcome,
    /// Shares sold.
    pub shares: Decimal,
}

/// State of the accumulation strategy. Owned by the engine context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BargainAccumulator {
    /// All holdings ever opened; resolved ones keep their history.
    pub holdings: Vec<BargainHolding>,
    /// No new opens before this instant (set when a stop fires).
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub stop_cooldown_until: Option<OffsetDateTime>,
}

impl BargainAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Holdings still waiting for a pair or a stop.
    pub fn active(&self) -> impl Iterator<Item = (usize, &BargainHolding)> {
        self.holdings
            .iter()
            .enumerate()
            .filter(|(_, h)| h.status == HoldingStatus::Holding)
    }

    /// Whether the post-stop cooldown blocks new activity.
    pub fn on_cooldown(&self, now: OffsetDateTime) -> bool {
        matches!(self.stop_cooldown_until, Some(until) if now < until)
    }

    /// Stack state for one market: the open leg (if any), the next round,
    /// and the price ceiling a new open must beat.
    fn stack_state(&self, slug: &str, config: &EngineConfig) -> (Option<usize>, u32, Decimal) {
        let unpaired = self
            .active()
            .filter(|(_, h)| h.market_slug == slug)
            .map(|(i, _)| i)
            .last();

        // Stopped rounds still count towards the round number so a stopped
        // round cannot be re-entered, but only successful buys lower the
        // price ceiling.
        let market_holdings: Vec<&BargainHolding> = self
            .holdings
            .iter()
            .filter(|h| h.market_slug == slug)
            .collect();

        let max_round = market_holdings.iter().map(|h| h.round).max().unwrap_or(0);

        let successful: Vec<&&BargainHolding> = market_holdings
            .iter()
            .filter(|h| h.status != HoldingStatus::Stopped)
            .collect();

        let ceiling = successful
            .iter()
            .filter(|h| h.round == successful.iter().map(|x| x.round).max().unwrap_or(0))
            .map(|h| h.buy_price)
            .min()
            .unwrap_or(config.bargain_price_threshold);

        (unpaired, max_round + 1, ceiling)
    }

    /// Scan quoted markets for bargain buys.
    ///
    /// Pairing an open leg always takes precedence; new opens are blocked
    /// while any unpaired holding exists anywhere, while the post-stop
    /// cooldown runs, and beyond the per-market round cap. Signals are
    /// returned cheapest ask first.
    pub fn scan(
        &self,
        quoted: &[(Market, PairQuote)],
        config: &EngineConfig,
    ) -> Vec<BargainSignal> {
        let now = OffsetDateTime::now_utc();
        if self.on_cooldown(now) {
            return Vec::new();
        }

        let mut signals = Vec::new();
        let any_unpaired = self.active().next().is_some();

        for (market, quote) in quoted {
            let (unpaired, next_round, ceiling) = self.stack_state(&market.slug, config);

            if let Some(index) = unpaired {
                // Pairing: the opposite side must bring combined cost under
                // the pairing threshold.
                let holding = &self.holdings[index];
                let opposite = holding.side.opposite();
                let ask = quote.ask(opposite);
                let target = config.bargain_pair_threshold - holding.buy_price;

                if ask >= config.bargain_min_price && ask < target {
                    signals.push(BargainSignal {
                        market: market.clone(),
                        side: opposite,
                        ask,
                        round: holding.round,
                        pairs_with: Some(index),
                    });
                }
                continue;
            }

            if any_unpaired {
                // A holding elsewhere still needs pairing; no new exposure.
                continue;
            }

            if next_round > config.bargain_max_rounds {
                continue;
            }

            // New round: cheaper side below the ceiling, above the
            // dead-market floor.
            let mut candidates: Vec<(Outcome, Decimal)> = [Outcome::Up, Outcome::Down]
                .into_iter()
                .map(|side| (side, quote.ask(side)))
                .filter(|(_, ask)| *ask >= config.bargain_min_price && *ask < ceiling)
                .collect();
            candidates.sort_by_key(|(_, ask)| *ask);

            if let Some((side, ask)) = candidates.into_iter().next() {
                signals.push(BargainSignal {
                    market: market.clone(),
                    side,
                    ask,
                    round: next_round,
                    pairs_with: None,
                });
            }
        }

        signals.sort_by_key(|s| s.ask);
        signals
    }

    /// Execute one signal: FOK buy, record the holding, pair if applicable.
    #[instrument(skip(self, client, signal, config), fields(market = %signal.market.slug, side = %signal.side))]
    pub async fn execute(
        &mut self,
        client: &dyn ExchangeClient,
        signal: &BargainSignal,
        config: &EngineConfig,
        dry_run: bool,
    ) -> Option<BargainActionResult> {
        let market = &signal.market;
        let token_id = market.token_id(signal.side).to_string();
        let complement_token_id = market.token_id(signal.side.opposite()).to_string();

        let amount_usd = config.order_size * signal.ask;
        if amount_usd < crate::engine::evaluator::MIN_ORDER_NOTIONAL {
            info!(amount = %amount_usd, "Bargain buy below notional floor, skipping");
            return None;
        }

        let params = OrderParams::buy(&token_id, signal.ask, config.order_size);
        let fill = match client.submit_order(&params).await {
            Ok(fill) if fill.filled => fill,
            Ok(_) => {
                info!("Bargain FOK killed");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Bargain buy failed");
                return None;
            }
        };

        crate::metrics::inc_bargain_buys();

        let status = if dry_run {
            TradeStatus::Simulated
        } else {
            TradeStatus::Executed
        };

        let holding = BargainHolding {
            market_slug: market.slug.clone(),
            condition_id: market.condition_id.clone(),
            side: signal.side,
            token_id,
            complement_token_id,
            buy_price: fill.fill_price,
            shares: fill.fill_size,
            amount_usd: fill.fill_price * fill.fill_size,
            round: signal.round,
            status: HoldingStatus::Holding,
            opened_at: OffsetDateTime::now_utc(),
            stop_armed_at: None,
        };

        info!(
            round = signal.round,
            price = %holding.buy_price,
            shares = %holding.shares,
            pairing = signal.pairs_with.is_some(),
            "Bargain buy filled"
        );

        match signal.pairs_with {
            Some(index) => {
                let counterpart = &mut self.holdings[index];
                let combined = counterpart.buy_price + holding.buy_price;
                let shares = counterpart.shares.min(holding.shares);
                let profit = (Decimal::ONE - combined) * shares;

                counterpart.status = HoldingStatus::Paired;
                let (up_price, down_price) = match holding.side {
                    Outcome::Up => (holding.buy_price, counterpart.buy_price),
                    Outcome::Down => (counterpart.buy_price, holding.buy_price),
                };

                let mut paired_holding = holding;
                paired_holding.status = HoldingStatus::Paired;
                let round = paired_holding.round;
                self.holdings.push(paired_holding);

                info!(
                    combined = %combined,
                    profit = %profit,
                    "Round {round} paired"
                );

                Some(BargainActionResult {
                    trade: Trade {
                        timestamp: OffsetDateTime::now_utc(),
                        kind: TradeKind::BargainPair,
                        market_slug: market.slug.clone(),
                        up_price,
                        down_price,
                        total_cost: combined,
                        order_size: shares,
                        profit,
                        profit_pct: profit_pct(profit, combined * shares),
                        status,
                        details: format!(
                            "round {round} paired: UP@{up_price} + DOWN@{down_price} = {combined}"
                        ),
                    },
                    completed_pair: Some(CompletedPair {
                        condition_id: market.condition_id.clone(),
                        market_slug: market.slug.clone(),
                        shares,
                    }),
                })
            }
            None => {
                let trade = Trade {
                    timestamp: OffsetDateTime::now_utc(),
                    kind: TradeKind::BargainOpen,
                    market_slug: market.slug.clone(),
                    up_price: match holding.side {
                        Outcome::Up => holding.buy_price,
                        Outcome::Down => Decimal::ZERO,
                    },
                    down_price: match holding.side {
                        Outcome::Down => holding.buy_price,
                        Outcome::Up => Decimal::ZERO,
                    },
                    total_cost: holding.buy_price,
                    order_size: holding.shares,
                    profit: Decimal::ZERO,
                    profit_pct: Decimal::ZERO,
                    status,
                    details: format!(
                        "round {} open: {}@{} x {}",
                        holding.round, holding.side, holding.buy_price, holding.shares
                    ),
                };
                self.holdings.push(holding);

                Some(BargainActionResult {
                    trade,
                    completed_pair: None,
                })
            }
        }
    }

    /// Arm, disarm, or fire stop-losses against this cycle's quotes.
    ///
    /// A drop of `bargain_stop_loss_cents` arms the stop; the sale is
    /// deferred by `bargain_stop_delay_seconds`. A recovery above the
    /// trigger before the delay elapses disarms it.
    #[instrument(skip_all)]
    pub async fn manage_stops(
        &mut self,
        client: &dyn ExchangeClient,
        quotes: &std::collections::HashMap<String, PairQuote>,
        config: &EngineConfig,
        dry_run: bool,
    ) -> Vec<StopResult> {
        let now = OffsetDateTime::now_utc();
        let mut stops = Vec::new();
        let mut cooldown_triggered = false;

        for holding in &mut self.holdings {
            if holding.status != HoldingStatus::Holding {
                continue;
            }
            let Some(quote) = quotes.get(&holding.market_slug) else {
                continue;
            };

            let current = quote.ask(holding.side);
            let trigger = holding.stop_trigger_price(config);

            if current > trigger {
                if holding.stop_armed_at.take().is_some() {
                    info!(
                        market = %holding.market_slug,
                        side = %holding.side,
                        price = %current,
                        "Price recovered, stop disarmed"
                    );
                }
                continue;
            }

            match holding.stop_armed_at {
                None => {
                    holding.stop_armed_at = Some(now);
                    info!(
                        market = %holding.market_slug,
                        side = %holding.side,
                        buy = %holding.buy_price,
                        price = %current,
                        delay = config.bargain_stop_delay_seconds,
                        "Stop-loss armed, sale deferred"
                    );
                }
                Some(armed_at) => {
                    let elapsed = (now - armed_at).whole_seconds();
                    if elapsed < config.bargain_stop_delay_seconds as i64 {
                        continue;
                    }

                    info!(
                        market = %holding.market_slug,
                        side = %holding.side,
                        buy = %holding.buy_price,
                        price = %current,
                        "Deferral elapsed without recovery, stopping out"
                    );

                    let proceeds =
                        sell_with_gtc_fallback(client, &holding.token_id, current, holding.shares)
                            .await;

                    holding.status = HoldingStatus::Stopped;
                    crate::metrics::inc_stop_losses();
                    cooldown_triggered = true;

                    let cost = holding.buy_price * holding.shares;
                    let (profit, sell_note) = match proceeds {
                        Some(p) => (p - cost, format!("sold for ${p}")),
                        None => (
                            (current - holding.buy_price) * holding.shares,
                            "sell resting/failed".to_string(),
                        ),
                    };

                    stops.push(StopResult {
                        trade: Trade {
                            timestamp: now,
                            kind: TradeKind::BargainStopLoss,
                            market_slug: holding.market_slug.clone(),
                            up_price: quote.up_ask,
                            down_price: quote.down_ask,
                            total_cost: quote.total_cost(),
                            order_size: holding.shares,
                            profit,
                            profit_pct: profit_pct(profit, cost),
                            status: if dry_run {
                                TradeStatus::Simulated
                            } else {
                                TradeStatus::Executed
                            },
                            details: format!(
                                "round {} stop: {}@{} -> {} | {}",
                                holding.round, holding.side, holding.buy_price, current, sell_note
                            ),
                        },
                        market_slug: holding.market_slug.clone(),
                        side: holding.side,
                        shares: holding.shares,
                    });
                }
            }
        }

        if cooldown_triggered {
            self.stop_cooldown_until = Some(
                now + time::Duration::seconds(config.bargain_stop_cooldown_seconds as i64),
            );
        }

        stops
    }

    /// Adopt a leg the paired executor could not sell back.
    pub fn adopt_orphan(&mut self, market: &Market, orphan: OrphanPosition) {
        info!(
            market = %market.slug,
            side = %orphan.side,
            shares = %orphan.shares,
            "Adopting orphan leg into bargain holdings"
        );

        self.holdings.push(BargainHolding {
            market_slug: market.slug.clone(),
            condition_id: market.condition_id.clone(),
            side: orphan.side,
            token_id: orphan.token_id.clone(),
            complement_token_id: market.token_id(orphan.side.opposite()).to_string(),
            buy_price: orphan.buy_price,
            shares: orphan.shares,
            amount_usd: orphan.buy_price * orphan.shares,
            round: 1,
            status: HoldingStatus::Holding,
            opened_at: OffsetDateTime::now_utc(),
            stop_armed_at: None,
        });
    }
}

/// FOK sell at the given price, with a GTC fallback. Returns realized
/// proceeds when the immediate sell filled.
async fn sell_with_gtc_fallback(
    client: &dyn ExchangeClient,
    token_id: &str,
    price: Decimal,
    shares: Decimal,
) -> Option<Decimal> {
    let fok = OrderParams::sell(token_id, price, shares);
    match client.submit_order(&fok).await {
        Ok(fill) if fill.filled => return Some(fill.fill_price * fill.fill_size),
        Ok(_) => info!(token = %token_id, "Stop sell FOK killed, resting GTC"),
        Err(e) => warn!(token = %token_id, error = %e, "Stop sell FOK failed, resting GTC"),
    }

    let gtc = OrderParams::sell(token_id, price, shares).with_tif(TimeInForce::Gtc);
    match client.submit_order(&gtc).await {
        Ok(fill) if fill.filled => Some(fill.fill_price * fill.fill_size),
        Ok(_) => None,
        Err(e) => {
            warn!(token = %token_id, error = %e, "Stop sell GTC failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_engine_config;
    use crate::exchange::MockExchange;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn test_market(slug: &str) -> Market {
        Market {
            condition_id: format!("0x{slug}"),
            slug: slug.to_string(),
            symbol: "btc".to_string(),
            up_token_id: format!("{slug}-up"),
            down_token_id: format!("{slug}-down"),
            end_timestamp: OffsetDateTime::now_utc().unix_timestamp() + 1200,
            question: None,
        }
    }

    fn quote(up_ask: Decimal, down_ask: Decimal) -> PairQuote {
        PairQuote {
            up_ask,
            down_ask,
            up_depth: dec!(500),
            down_depth: dec!(500),
            fetched_at: OffsetDateTime::now_utc(),
        }
    }

    fn holding(market: &Market, side: Outcome, buy_price: Decimal, round: u32) -> BargainHolding {
        BargainHolding {
            market_slug: market.slug.clone(),
            condition_id: market.condition_id.clone(),
            side,
            token_id: market.token_id(side).to_string(),
            complement_token_id: market.token_id(side.opposite()).to_string(),
            buy_price,
            shares: dec!(30),
            amount_usd: buy_price * dec!(30),
            round,
            status: HoldingStatus::Holding,
            opened_at: OffsetDateTime::now_utc(),
            stop_armed_at: None,
        }
    }

    #[test]
    fn opens_cheapest_side_below_threshold() {
        let acc = BargainAccumulator::new();
        let config = test_engine_config();
        let market = test_market("btc-updown-15m-1");

        let signals = acc.scan(&[(market, quote(dec!(0.45), dec!(0.56)))], &config);

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Outcome::Up);
        assert_eq!(signals[0].round, 1);
        assert!(signals[0].pairs_with.is_none());
    }

    #[test]
    fn floor_excludes_dead_markets() {
        let acc = BargainAccumulator::new();
        let config = test_engine_config();
        let market = test_market("btc-updown-15m-1");

        // 0.05 is below the 0.10 floor: a side that cheap means the market
        // has effectively settled
        let signals = acc.scan(&[(market, quote(dec!(0.05), dec!(0.97)))], &config);
        assert!(signals.is_empty());
    }

    #[test]
    fn cheap_opposite_side_triggers_pairing() {
        // Holding bought at $0.45; opposite at $0.52 with pair threshold
        // $0.99: 0.45 + 0.52 = 0.97 < 0.99 -> pair
        let mut acc = BargainAccumulator::new();
        let config = test_engine_config();
        let market = test_market("btc-updown-15m-1");
        acc.holdings.push(holding(&market, Outcome::Up, dec!(0.45), 1));

        let signals = acc.scan(&[(market, quote(dec!(0.45), dec!(0.52)))], &config);

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Outcome::Down);
        assert_eq!(signals[0].pairs_with, Some(0));
    }

    #[test]
    fn pairing_blocked_when_combined_cost_too_high() {
        let mut acc = BargainAccumulator::new();
        let config = test_engine_config();
        let market = test_market("btc-updown-15m-1");
        acc.holdings.push(holding(&market, Outcome::Up, dec!(0.45), 1));

        // 0.45 + 0.55 = 1.00 >= 0.99
        let signals = acc.scan(&[(market, quote(dec!(0.45), dec!(0.55)))], &config);
        assert!(signals.is_empty());
    }

    #[test]
    fn unpaired_holding_blocks_new_opens_elsewhere() {
        let mut acc = BargainAccumulator::new();
        let config = test_engine_config();
        let held = test_market("btc-updown-15m-1");
        let other = test_market("eth-updown-15m-1");
        acc.holdings.push(holding(&held, Outcome::Up, dec!(0.45), 1));

        // Cheap side on the other market, but the open leg takes precedence
        let signals = acc.scan(&[(other, quote(dec!(0.40), dec!(0.58)))], &config);
        assert!(signals.is_empty());
    }

    #[test]
    fn next_round_requires_price_below_previous_buy() {
        let mut acc = BargainAccumulator::new();
        let config = test_engine_config();
        let market = test_market("btc-updown-15m-1");

        let mut paired_a = holding(&market, Outcome::Up, dec!(0.45), 1);
        paired_a.status = HoldingStatus::Paired;
        let mut paired_b = holding(&market, Outcome::Down, dec!(0.48), 1);
        paired_b.status = HoldingStatus::Paired;
        acc.holdings.push(paired_a);
        acc.holdings.push(paired_b);

        // 0.46 is not below round 1's lowest buy (0.45)
        let signals = acc.scan(&[(market.clone(), quote(dec!(0.46), dec!(0.56)))], &config);
        assert!(signals.is_empty());

        // 0.43 is
        let signals = acc.scan(&[(market, quote(dec!(0.43), dec!(0.56)))], &config);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].round, 2);
    }

    #[test]
    fn round_cap_bounds_exposure() {
        let mut acc = BargainAccumulator::new();
        let mut config = test_engine_config();
        config.bargain_max_rounds = 1;
        let market = test_market("btc-updown-15m-1");

        let mut done = holding(&market, Outcome::Up, dec!(0.45), 1);
        done.status = HoldingStatus::Paired;
        acc.holdings.push(done);

        let signals = acc.scan(&[(market, quote(dec!(0.30), dec!(0.60)))], &config);
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn execute_open_then_pair_feeds_merger() {
        let mock = MockExchange::new();
        let mut acc = BargainAccumulator::new();
        let config = test_engine_config();
        let market = test_market("btc-updown-15m-1");

        let open = BargainSignal {
            market: market.clone(),
            side: Outcome::Up,
            ask: dec!(0.45),
            round: 1,
            pairs_with: None,
        };
        let result = acc.execute(&mock, &open, &config, true).await.unwrap();
        assert_eq!(result.trade.kind, TradeKind::BargainOpen);
        assert!(result.completed_pair.is_none());
        assert_eq!(acc.active().count(), 1);

        let pair = BargainSignal {
            market: market.clone(),
            side: Outcome::Down,
            ask: dec!(0.52),
            round: 1,
            pairs_with: Some(0),
        };
        let result = acc.execute(&mock, &pair, &config, true).await.unwrap();
        assert_eq!(result.trade.kind, TradeKind::BargainPair);
        assert_eq!(result.trade.total_cost, dec!(0.97));

        let completed = result.completed_pair.unwrap();
        assert_eq!(completed.shares, dec!(50));
        assert_eq!(acc.active().count(), 0);
        assert!(acc
            .holdings
            .iter()
            .all(|h| h.status == HoldingStatus::Paired));
    }

    #[tokio::test]
    async fn drop_arms_stop_and_fires_after_delay() {
        // Held at $0.45, drops to $0.42 (threshold 0.02): arms. Still at
        // $0.43 after the deferral window: stops.
        let mock = MockExchange::new();
        let mut acc = BargainAccumulator::new();
        let mut config = test_engine_config();
        config.bargain_stop_delay_seconds = 60;
        let market = test_market("btc-updown-15m-1");
        acc.holdings.push(holding(&market, Outcome::Up, dec!(0.45), 1));

        let mut quotes = HashMap::new();
        quotes.insert(market.slug.clone(), quote(dec!(0.42), dec!(0.56)));

        // First sighting arms, does not sell
        let trades = acc.manage_stops(&mock, &quotes, &config, true).await;
        assert!(trades.is_empty());
        assert!(acc.holdings[0].stop_armed_at.is_some());
        assert_eq!(acc.holdings[0].status, HoldingStatus::Holding);

        // Backdate the arm to simulate the delay elapsing
        acc.holdings[0].stop_armed_at =
            Some(OffsetDateTime::now_utc() - time::Duration::seconds(61));
        quotes.insert(market.slug.clone(), quote(dec!(0.43), dec!(0.56)));

        let stops = acc.manage_stops(&mock, &quotes, &config, true).await;
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].trade.kind, TradeKind::BargainStopLoss);
        assert!(stops[0].trade.profit < dec!(0));
        assert_eq!(stops[0].side, Outcome::Up);
        assert_eq!(stops[0].shares, dec!(30));
        assert_eq!(acc.holdings[0].status, HoldingStatus::Stopped);
        assert!(acc.stop_cooldown_until.is_some());
    }

    #[tokio::test]
    async fn recovery_before_delay_disarms_stop() {
        let mock = MockExchange::new();
        let mut acc = BargainAccumulator::new();
        let config = test_engine_config();
        let market = test_market("btc-updown-15m-1");
        acc.holdings.push(holding(&market, Outcome::Up, dec!(0.45), 1));

        let mut quotes = HashMap::new();
        quotes.insert(market.slug.clone(), quote(dec!(0.42), dec!(0.56)));
        acc.manage_stops(&mock, &quotes, &config, true).await;
        assert!(acc.holdings[0].stop_armed_at.is_some());

        // Recovers above buy - cents = 0.43 before the delay elapses
        quotes.insert(market.slug.clone(), quote(dec!(0.44), dec!(0.56)));
        let trades = acc.manage_stops(&mock, &quotes, &config, true).await;

        assert!(trades.is_empty());
        assert!(acc.holdings[0].stop_armed_at.is_none());
        assert_eq!(acc.holdings[0].status, HoldingStatus::Holding);
    }

    #[tokio::test]
    async fn cooldown_blocks_scan_after_stop() {
        let mock = MockExchange::new();
        let mut acc = BargainAccumulator::new();
        let mut config = test_engine_config();
        config.bargain_stop_delay_seconds = 0;
        let market = test_market("btc-updown-15m-1");
        acc.holdings.push(holding(&market, Outcome::Up, dec!(0.45), 1));

        let mut quotes = HashMap::new();
        quotes.insert(market.slug.clone(), quote(dec!(0.40), dec!(0.56)));
        acc.manage_stops(&mock, &quotes, &config, true).await;
        acc.holdings[0].stop_armed_at =
            Some(OffsetDateTime::now_utc() - time::Duration::seconds(1));
        acc.manage_stops(&mock, &quotes, &config, true).await;
        assert_eq!(acc.holdings[0].status, HoldingStatus::Stopped);

        let fresh = test_market("eth-updown-15m-1");
        let signals = acc.scan(&[(fresh, quote(dec!(0.30), dec!(0.65)))], &config);
        assert!(signals.is_empty());
    }

    #[test]
    fn orphan_adoption_creates_holding() {
        let mut acc = BargainAccumulator::new();
        let market = test_market("btc-updown-15m-1");

        acc.adopt_orphan(
            &market,
            OrphanPosition {
                side: Outcome::Down,
                token_id: market.down_token_id.clone(),
                buy_price: dec!(0.50),
                shares: dec!(20),
            },
        );

        assert_eq!(acc.active().count(), 1);
        let adopted = &acc.holdings[0];
        assert_eq!(adopted.side, Outcome::Down);
        assert_eq!(adopted.complement_token_id, market.up_token_id);
    }
}
