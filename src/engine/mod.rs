//! The trading engine: owned shared state and the scan loop.
//!
//! One tokio task owns every trading mutation. The control surface and the
//! status feed read consistent snapshots through the [`EngineContext`];
//! writes from the loop are atomic replace-or-append operations, never
//! multi-step edits visible mid-update.

pub mod bargain;
pub mod evaluator;
pub mod executor;
pub mod merger;
pub mod status;
pub mod trade;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{error, info, instrument, warn};

use crate::config::{Config, EngineConfig, EngineConfigPatch};
use crate::exchange::{ExchangeClient, SimExchange};
use crate::market::{Market, MarketFeed, PairQuote};
use crate::storage::{self, PersistedState};

use bargain::BargainAccumulator;
use evaluator::{MarketTradeStats, PairOpportunity};
use executor::PairExecutor;
use merger::{MergeRecord, MergeTracker};
use status::{BotStatus, EngineEvent, MarketPrice, StatusSnapshot};
use trade::Trade;

pub use evaluator::evaluate;
pub use executor::{AttemptState, PairAttemptResult};

/// Consecutive fully-failed discovery cycles before the engine declares
/// connectivity lost and stops itself.
const FATAL_DISCOVERY_FAILURES: u32 = 20;

/// Capacity of the outbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared engine state: one writer (the scan loop), many snapshot readers.
pub struct EngineContext {
    /// Runtime config; the loop clones the Arc once per cycle.
    config: RwLock<Arc<EngineConfig>>,
    /// Run flag checked at the top of each cycle.
    running: AtomicBool,
    /// Counters, histories, logs.
    status: RwLock<BotStatus>,
    /// Bargain strategy state.
    bargain: RwLock<BargainAccumulator>,
    /// Merge tracker state.
    merger: RwLock<MergeTracker>,
    /// Current per-market quotes.
    prices: DashMap<String, PairQuote>,
    /// Per-market trade counters and cooldown timestamps.
    market_stats: DashMap<String, MarketTradeStats>,
    /// Outbound event feed.
    events: broadcast::Sender<EngineEvent>,
    /// Wakes the loop for a manual scan.
    scan_notify: Notify,
    /// Live exchange client.
    live_client: Arc<dyn ExchangeClient>,
    /// Simulated client over the live one, for dry-run cycles.
    sim_client: Arc<dyn ExchangeClient>,
    /// State file path.
    state_file: String,
}

impl EngineContext {
    /// Build the context, restoring persisted state when present.
    pub fn new(
        config: &Config,
        live_client: Arc<dyn ExchangeClient>,
        persisted: Option<PersistedState>,
    ) -> Arc<Self> {
        let sim_client: Arc<dyn ExchangeClient> =
            Arc::new(SimExchange::new(live_client.clone()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let (engine_config, bargain, merger, trade_history) = match persisted {
            Some(state) => (
                state.engine_config,
                state.bargain,
                state.merger,
                state.trade_history,
            ),
            None => (
                config.engine_config(),
                BargainAccumulator::new(),
                MergeTracker::new(config.auto_merge),
                Vec::new(),
            ),
        };

        // Replay history so totals, day counters, and per-market gates are
        // recomputed from the append-only record rather than trusted.
        let mut status = BotStatus::new();
        let market_stats = DashMap::new();
        for trade in trade_history {
            let mut entry = market_stats
                .entry(trade.market_slug.clone())
                .or_insert_with(MarketTradeStats::default);
            entry.trades += 1;
            entry.last_trade_at = Some(trade.timestamp);
            drop(entry);
            status.record_trade(trade);
        }

        Arc::new(Self {
            config: RwLock::new(Arc::new(engine_config)),
            running: AtomicBool::new(false),
            status: RwLock::new(status),
            bargain: RwLock::new(bargain),
            merger: RwLock::new(merger),
            prices: DashMap::new(),
            market_stats,
            events,
            scan_notify: Notify::new(),
            live_client,
            sim_client,
            state_file: config.state_file.clone(),
        })
    }

    /// Current engine config. Cloned once at the top of a cycle; updates
    /// never land mid-cycle.
    pub async fn engine_config(&self) -> Arc<EngineConfig> {
        self.config.read().await.clone()
    }

    /// Apply a config patch. Invalid values are rejected and the previous
    /// config stays in force; valid ones take effect at the next cycle.
    pub async fn update_config(&self, patch: &EngineConfigPatch) -> Result<EngineConfig, String> {
        let current = self.engine_config().await;
        let updated = patch.apply(&current);
        updated.validate()?;

        *self.config.write().await = Arc::new(updated.clone());
        self.add_log("configuration updated").await;
        self.persist().await;
        Ok(updated)
    }

    /// Whether the scan loop is trading.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start trading. No-op when already running.
    pub async fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.status.write().await.start_time = Some(OffsetDateTime::now_utc());
        self.add_log("engine started").await;
        self.scan_notify.notify_one();
        true
    }

    /// Request a stop. The in-flight cycle completes first.
    pub async fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.add_log("engine stopping after current cycle").await;
        true
    }

    /// Wake the loop for an immediate scan.
    pub fn trigger_scan(&self) {
        self.scan_notify.notify_one();
    }

    /// Subscribe to the outbound event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The client trades go through this cycle.
    fn trading_client(&self, dry_run: bool) -> &Arc<dyn ExchangeClient> {
        if dry_run {
            &self.sim_client
        } else {
            &self.live_client
        }
    }

    /// Append a status log line.
    pub async fn add_log(&self, message: impl Into<String>) {
        self.status.write().await.add_log(message);
    }

    /// Per-market stats for the evaluator.
    fn stats_for(&self, slug: &str) -> MarketTradeStats {
        self.market_stats
            .get(slug)
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Record a terminal trade: history, counters, per-market gates, event.
    pub async fn record_trade(&self, trade: Trade) {
        {
            let mut entry = self
                .market_stats
                .entry(trade.market_slug.clone())
                .or_insert_with(MarketTradeStats::default);
            entry.trades += 1;
            entry.last_trade_at = Some(trade.timestamp);
        }

        let mut status = self.status.write().await;
        status.add_log(format!(
            "{} {} on {}: {}",
            trade.status, trade.kind, trade.market_slug, trade.details
        ));
        status.record_trade(trade.clone());
        drop(status);

        let _ = self.events.send(EngineEvent::Trade(trade));
    }

    /// Record a merge attempt and publish it.
    pub async fn record_merge(&self, record: MergeRecord) {
        self.add_log(format!(
            "merge {} on {}: {} pairs -> {} USDC",
            record.status, record.market_slug, record.amount, record.usdc_received
        ))
        .await;
        let _ = self.events.send(EngineEvent::Merge(record));
    }

    /// Manually merge one position.
    pub async fn merge_one(&self, condition_id: &str) -> Option<MergeRecord> {
        let config = self.engine_config().await;
        let client = self.trading_client(config.dry_run).clone();
        let record = self
            .merger
            .write()
            .await
            .merge(
                client.as_ref(),
                condition_id,
                config.min_merge_amount,
                config.dry_run,
            )
            .await;

        if let Some(record) = &record {
            self.record_merge(record.clone()).await;
            self.persist().await;
        }
        record
    }

    /// Manually merge every position with a mergeable amount.
    pub async fn merge_all(&self) -> Vec<MergeRecord> {
        let config = self.engine_config().await;
        let client = self.trading_client(config.dry_run).clone();
        let records = self
            .merger
            .write()
            .await
            .merge_all(client.as_ref(), config.min_merge_amount, config.dry_run)
            .await;

        for record in &records {
            self.record_merge(record.clone()).await;
        }
        if !records.is_empty() {
            self.persist().await;
        }
        records
    }

    /// Flip the auto-merge toggle, returning the new value.
    pub async fn toggle_auto_merge(&self) -> bool {
        let mut merger = self.merger.write().await;
        merger.auto_merge_enabled = !merger.auto_merge_enabled;
        let enabled = merger.auto_merge_enabled;
        drop(merger);

        self.add_log(format!(
            "auto-merge {}",
            if enabled { "enabled" } else { "disabled" }
        ))
        .await;
        self.persist().await;
        enabled
    }

    /// Read-side snapshot of the merge tracker.
    pub async fn merge_snapshot(&self) -> merger::MergeSnapshot {
        self.merger.read().await.snapshot()
    }

    /// Assemble the full status snapshot.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let config = self.engine_config().await;
        let prices: BTreeMap<String, MarketPrice> = self
            .prices
            .iter()
            .map(|entry| (entry.key().clone(), MarketPrice::from(entry.value())))
            .collect();

        let holdings = self.bargain.read().await.holdings.clone();
        let merge = self.merger.read().await.snapshot();

        self.status
            .read()
            .await
            .snapshot(self.is_running(), config.dry_run, prices, holdings, merge)
    }

    /// Persist durable state. Failures are logged, never fatal.
    pub async fn persist(&self) {
        let state = PersistedState {
            engine_config: self.engine_config().await.as_ref().clone(),
            trade_history: self.status.read().await.trade_history.clone(),
            bargain: self.bargain.read().await.clone(),
            merger: self.merger.read().await.clone(),
        };

        if let Err(e) = storage::save_state(&state, &self.state_file) {
            error!(error = %e, "State persistence failed");
        }
    }
}

/// The scan loop task.
pub struct Engine {
    ctx: Arc<EngineContext>,
    feed: MarketFeed,
    discovery_failures: AtomicU32,
}

impl Engine {
    /// Build the engine over a context and a market feed.
    pub fn new(ctx: Arc<EngineContext>, feed: MarketFeed) -> Self {
        Self {
            ctx,
            feed,
            discovery_failures: AtomicU32::new(0),
        }
    }

    /// Drive scan cycles until the process exits.
    ///
    /// The run flag is honored only at cycle boundaries: a stop request
    /// lets an in-flight paired attempt reach its terminal state.
    pub async fn run(self) {
        info!("Scan loop ready");

        loop {
            if !self.ctx.is_running() {
                tokio::select! {
                    _ = self.ctx.scan_notify.notified() => {}
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                }
                continue;
            }

            let config = self.ctx.engine_config().await;
            let cycle_start = std::time::Instant::now();
            self.run_cycle(&config).await;
            crate::metrics::record_cycle_latency(cycle_start);

            tokio::select! {
                _ = self.ctx.scan_notify.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(config.scan_interval_seconds)) => {}
            }
        }
    }

    /// One full cycle: discover, refresh, evaluate, execute, bargain,
    /// merge, publish, persist.
    #[instrument(skip_all)]
    async fn run_cycle(&self, config: &EngineConfig) {
        let ctx = &self.ctx;

        // Discovery. Per-market failures are isolated inside the feed; a
        // total failure counts towards the fatal threshold.
        let markets = match self.feed.discover(config.min_time_remaining_seconds).await {
            Ok(markets) => {
                self.discovery_failures.store(0, Ordering::Relaxed);
                markets
            }
            Err(e) => {
                let failures = self.discovery_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, failures, "Discovery failed entirely");
                ctx.add_log(format!("discovery failed ({failures} in a row)")).await;

                if failures >= FATAL_DISCOVERY_FAILURES {
                    error!("Exchange connectivity lost, stopping engine");
                    ctx.add_log("FATAL: exchange connectivity lost, engine stopped")
                        .await;
                    ctx.running.store(false, Ordering::SeqCst);
                }
                return;
            }
        };

        // Markets no longer returned by discovery are discarded.
        let live: std::collections::HashSet<&str> =
            markets.iter().map(|m| m.slug.as_str()).collect();
        ctx.prices.retain(|slug, _| live.contains(slug.as_str()));

        if markets.is_empty() {
            ctx.add_log("no eligible markets this cycle").await;
            self.finish_cycle().await;
            return;
        }

        let client = ctx.trading_client(config.dry_run).clone();

        // Quote refresh, concurrent across markets, isolated per market.
        let refreshed = futures::future::join_all(
            markets
                .iter()
                .map(|market| self.feed.refresh_quote(client.as_ref(), market)),
        )
        .await;

        let mut quoted: Vec<(Market, PairQuote)> = Vec::new();
        for (market, quote) in markets.into_iter().zip(refreshed) {
            match quote {
                Some(quote) => {
                    ctx.prices.insert(market.slug.clone(), quote);
                    quoted.push((market, quote));
                }
                None => {
                    // Excluded this cycle, re-attempted next.
                    ctx.prices.remove(&market.slug);
                }
            }
        }

        // Evaluation.
        let mut opportunities: Vec<(Market, PairQuote, PairOpportunity)> = Vec::new();
        for (market, quote) in &quoted {
            let stats = ctx.stats_for(&market.slug);
            let opportunity = evaluator::evaluate(market, quote, config, &stats);
            if opportunity.viable {
                crate::metrics::inc_opportunities_detected();
            }
            opportunities.push((market.clone(), *quote, opportunity));
        }

        {
            let mut status = ctx.status.write().await;
            status.scan_count += 1;
            status.opportunities_found +=
                opportunities.iter().filter(|(_, _, o)| o.viable).count() as u64;
            status.current_opportunities =
                opportunities.iter().map(|(_, _, o)| o.clone()).collect();
        }

        // Paired execution, best edge first, one attempt at a time. A stop
        // request interrupts between attempts, never inside one.
        let mut viable: Vec<&(Market, PairQuote, PairOpportunity)> =
            opportunities.iter().filter(|(_, _, o)| o.viable).collect();
        viable.sort_by(|a, b| b.2.potential_profit.cmp(&a.2.potential_profit));

        for (market, quote, _) in viable {
            if !ctx.is_running() {
                break;
            }

            let executor = PairExecutor::new(client.as_ref());
            let result = executor.execute(market, quote, config, config.dry_run).await;

            if result.filled_pairs > rust_decimal::Decimal::ZERO {
                ctx.merger.write().await.track(
                    market,
                    result.filled_pairs,
                    result.filled_pairs,
                );
            }

            if let Some(orphan) = result.orphan {
                let (up_delta, down_delta) = match orphan.side {
                    crate::market::Outcome::Up => (orphan.shares, rust_decimal::Decimal::ZERO),
                    crate::market::Outcome::Down => (rust_decimal::Decimal::ZERO, orphan.shares),
                };
                ctx.merger.write().await.track(market, up_delta, down_delta);
                ctx.bargain.write().await.adopt_orphan(market, orphan);
            }

            ctx.record_trade(result.trade).await;
        }

        // Bargain strategy: stops first, then new buys.
        if config.bargain_enabled {
            self.run_bargain(config, client.as_ref(), &quoted).await;
        }

        // Auto-merge on the scan cadence.
        let auto = config.auto_merge && ctx.merger.read().await.auto_merge_enabled;
        if auto {
            let records = ctx
                .merger
                .write()
                .await
                .merge_all(client.as_ref(), config.min_merge_amount, config.dry_run)
                .await;
            for record in records {
                ctx.record_merge(record).await;
            }
        }

        self.finish_cycle().await;
    }

    /// Bargain sub-cycle: manage stops, then execute new signals.
    async fn run_bargain(
        &self,
        config: &EngineConfig,
        client: &dyn ExchangeClient,
        quoted: &[(Market, PairQuote)],
    ) {
        let ctx = &self.ctx;
        let quote_map: HashMap<String, PairQuote> = quoted
            .iter()
            .map(|(m, q)| (m.slug.clone(), *q))
            .collect();

        let by_slug: HashMap<&str, &Market> =
            quoted.iter().map(|(m, _)| (m.slug.as_str(), m)).collect();

        // Deferred stop-losses.
        let stops = ctx
            .bargain
            .write()
            .await
            .manage_stops(client, &quote_map, config, config.dry_run)
            .await;

        for stop in stops {
            // The stopped leg left the balance sheet.
            if let Some(market) = by_slug.get(stop.market_slug.as_str()) {
                let (up_delta, down_delta) = match stop.side {
                    crate::market::Outcome::Up => (-stop.shares, rust_decimal::Decimal::ZERO),
                    crate::market::Outcome::Down => (rust_decimal::Decimal::ZERO, -stop.shares),
                };
                ctx.merger.write().await.track(market, up_delta, down_delta);
            }
            ctx.record_trade(stop.trade).await;
        }

        // New signals, cheapest first; per-market trade cap still applies.
        let eligible: Vec<(Market, PairQuote)> = quoted
            .iter()
            .filter(|(m, _)| ctx.stats_for(&m.slug).trades < config.max_trades_per_market)
            .cloned()
            .collect();

        let signals = ctx.bargain.read().await.scan(&eligible, config);

        for signal in signals {
            if !ctx.is_running() {
                break;
            }

            let result = ctx
                .bargain
                .write()
                .await
                .execute(client, &signal, config, config.dry_run)
                .await;

            if let Some(result) = result {
                // Every fill flows into the balance sheet.
                let (up_delta, down_delta) = match signal.side {
                    crate::market::Outcome::Up => {
                        (result.trade.order_size, rust_decimal::Decimal::ZERO)
                    }
                    crate::market::Outcome::Down => {
                        (rust_decimal::Decimal::ZERO, result.trade.order_size)
                    }
                };
                ctx.merger
                    .write()
                    .await
                    .track(&signal.market, up_delta, down_delta);

                if let Some(pair) = &result.completed_pair {
                    ctx.add_log(format!(
                        "bargain pair complete on {}: {} shares",
                        pair.market_slug, pair.shares
                    ))
                    .await;
                }

                ctx.record_trade(result.trade).await;
            }
        }
    }

    /// Publish snapshot + keepalive and persist state.
    async fn finish_cycle(&self) {
        let snapshot = self.ctx.snapshot().await;
        let _ = self
            .ctx
            .events
            .send(EngineEvent::Snapshot(Box::new(snapshot)));
        let _ = self.ctx.events.send(status::keepalive());
        self.ctx.persist().await;
    }
}
