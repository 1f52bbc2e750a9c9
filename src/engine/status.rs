//! Status aggregation and the outbound event feed.
//!
//! Pure read-side: snapshots are assembled from engine state and published
//! over a broadcast channel for the external push layer, together with
//! per-trade and per-merge events and a periodic keepalive. Nothing here
//! mutates trading state.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::engine::bargain::BargainHolding;
use crate::engine::evaluator::PairOpportunity;
use crate::engine::merger::{MergeRecord, MergeSnapshot};
use crate::engine::trade::Trade;
use crate::market::PairQuote;

/// Bounded length of the textual log.
const LOG_CAPACITY: usize = 200;

/// Log lines included in a snapshot.
const LOG_TAIL: usize = 50;

/// Trades included in a snapshot.
const TRADE_TAIL: usize = 20;

/// One market's current prices, as published.
#[derive(Debug, Clone, Serialize)]
pub struct MarketPrice {
    /// Best ask on UP.
    pub up_ask: Decimal,
    /// Best ask on DOWN.
    pub down_ask: Decimal,
    /// Quoted depth on UP.
    pub up_depth: Decimal,
    /// Quoted depth on DOWN.
    pub down_depth: Decimal,
    /// Combined pair cost.
    pub total_cost: Decimal,
}

impl From<&PairQuote> for MarketPrice {
    fn from(quote: &PairQuote) -> Self {
        Self {
            up_ask: quote.up_ask,
            down_ask: quote.down_ask,
            up_depth: quote.up_depth,
            down_depth: quote.down_depth,
            total_cost: quote.total_cost(),
        }
    }
}

/// Counters for one UTC day. Reset only at the date boundary.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DayCounters {
    /// The UTC date the counters cover (YYYY-MM-DD).
    pub date: String,
    /// Trades recorded today.
    pub trades: u64,
    /// Profit recorded today.
    pub profit: Decimal,
}

/// Aggregated engine state for external consumption.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Whether the scan loop is running.
    pub running: bool,
    /// "simulation" or "live".
    pub mode: String,
    /// When the current run started, RFC 3339.
    pub start_time: Option<String>,
    /// Scan cycles completed.
    pub scan_count: u64,
    /// Cumulative trades recorded.
    pub total_trades: u64,
    /// Cumulative profit across executed and simulated trades.
    pub total_profit: Decimal,
    /// Viable opportunities seen.
    pub opportunities_found: u64,
    /// Today's counters.
    pub today: DayCounters,
    /// Current per-market price table.
    pub market_prices: BTreeMap<String, MarketPrice>,
    /// This cycle's opportunity evaluations.
    pub opportunities: Vec<PairOpportunity>,
    /// Most recent trades, oldest first.
    pub recent_trades: Vec<Trade>,
    /// Open and resolved bargain holdings still tracked.
    pub bargain_holdings: Vec<BargainHolding>,
    /// Merge tracker state.
    pub merge: MergeSnapshot,
    /// Recent log lines.
    pub logs: Vec<String>,
}

/// Events published to the external push layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Periodic full snapshot.
    Snapshot(Box<StatusSnapshot>),
    /// A new trade reached a terminal state.
    Trade(Trade),
    /// A merge attempt completed.
    Merge(MergeRecord),
    /// Liveness signal.
    Keepalive {
        /// RFC 3339 timestamp.
        timestamp: String,
    },
}

/// Mutable status owned by the scan loop; read via snapshots.
#[derive(Debug)]
pub struct BotStatus {
    /// When the current run started.
    pub start_time: Option<OffsetDateTime>,
    /// Scan cycles completed.
    pub scan_count: u64,
    /// Cumulative trades recorded.
    pub total_trades: u64,
    /// Cumulative profit across executed and simulated trades.
    pub total_profit: Decimal,
    /// Viable opportunities seen.
    pub opportunities_found: u64,
    /// Today's counters.
    pub today: DayCounters,
    /// Full trade history, append-only.
    pub trade_history: Vec<Trade>,
    /// This cycle's evaluations.
    pub current_opportunities: Vec<PairOpportunity>,
    /// Bounded textual log.
    logs: VecDeque<String>,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BotStatus {
    /// Fresh status with empty history.
    pub fn new() -> Self {
        Self {
            start_time: None,
            scan_count: 0,
            total_trades: 0,
            total_profit: Decimal::ZERO,
            opportunities_found: 0,
            today: DayCounters::default(),
            trade_history: Vec::new(),
            current_opportunities: Vec::new(),
            logs: VecDeque::with_capacity(LOG_CAPACITY),
        }
    }

    /// Append a log line, dropping the oldest past capacity.
    pub fn add_log(&mut self, message: impl Into<String>) {
        let now = OffsetDateTime::now_utc();
        let line = format!(
            "[{:02}:{:02}:{:02}] {}",
            now.hour(),
            now.minute(),
            now.second(),
            message.into()
        );

        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    /// Record a terminal trade: history, cumulative and day counters.
    pub fn record_trade(&mut self, trade: Trade) {
        self.roll_day(trade.timestamp);

        self.total_trades += 1;
        self.today.trades += 1;
        if trade.counts_towards_profit() {
            self.total_profit += trade.profit;
            self.today.profit += trade.profit;
        }

        self.trade_history.push(trade);
    }

    /// Reset day counters when the UTC date has changed. Never decrements
    /// inside a day.
    fn roll_day(&mut self, now: OffsetDateTime) {
        let date = format!(
            "{:04}-{:02}-{:02}",
            now.year(),
            u8::from(now.month()),
            now.day()
        );
        if self.today.date != date {
            self.today = DayCounters {
                date,
                trades: 0,
                profit: Decimal::ZERO,
            };
        }
    }

    /// Assemble the published snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn snapshot(
        &self,
        running: bool,
        dry_run: bool,
        prices: BTreeMap<String, MarketPrice>,
        holdings: Vec<BargainHolding>,
        merge: MergeSnapshot,
    ) -> StatusSnapshot {
        StatusSnapshot {
            running,
            mode: if dry_run { "simulation" } else { "live" }.to_string(),
            start_time: self
                .start_time
                .and_then(|t| t.format(&Rfc3339).ok()),
            scan_count: self.scan_count,
            total_trades: self.total_trades,
            total_profit: self.total_profit,
            opportunities_found: self.opportunities_found,
            today: self.today.clone(),
            market_prices: prices,
            opportunities: self.current_opportunities.clone(),
            recent_trades: self
                .trade_history
                .iter()
                .rev()
                .take(TRADE_TAIL)
                .rev()
                .cloned()
                .collect(),
            bargain_holdings: holdings,
            merge,
            logs: self
                .logs
                .iter()
                .rev()
                .take(LOG_TAIL)
                .rev()
                .cloned()
                .collect(),
        }
    }
}

/// A keepalive event stamped now.
pub fn keepalive() -> EngineEvent {
    EngineEvent::Keepalive {
        timestamp: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::trade::{TradeKind, TradeStatus};
    use rust_decimal_macros::dec;
    use time::Duration;

    fn trade_at(timestamp: OffsetDateTime, profit: Decimal, status: TradeStatus) -> Trade {
        Trade {
            timestamp,
            kind: TradeKind::ArbitragePair,
            market_slug: "btc-updown-15m-1".to_string(),
            up_price: dec!(0.48),
            down_price: dec!(0.50),
            total_cost: dec!(0.98),
            order_size: dec!(50),
            profit,
            profit_pct: dec!(2),
            status,
            details: String::new(),
        }
    }

    #[test]
    fn failed_trades_count_but_add_no_profit() {
        let mut status = BotStatus::new();
        let now = OffsetDateTime::now_utc();

        status.record_trade(trade_at(now, dec!(1), TradeStatus::Executed));
        status.record_trade(trade_at(now, dec!(-5), TradeStatus::Failed));

        assert_eq!(status.total_trades, 2);
        assert_eq!(status.total_profit, dec!(1));
    }

    #[test]
    fn day_counters_roll_at_date_boundary() {
        let mut status = BotStatus::new();
        let yesterday = OffsetDateTime::now_utc() - Duration::days(1);
        let today = OffsetDateTime::now_utc();

        status.record_trade(trade_at(yesterday, dec!(1), TradeStatus::Executed));
        assert_eq!(status.today.trades, 1);

        status.record_trade(trade_at(today, dec!(2), TradeStatus::Executed));
        // Day bucket reset, cumulative kept
        assert_eq!(status.today.trades, 1);
        assert_eq!(status.today.profit, dec!(2));
        assert_eq!(status.total_trades, 2);
        assert_eq!(status.total_profit, dec!(3));
    }

    #[test]
    fn log_is_bounded() {
        let mut status = BotStatus::new();
        for i in 0..LOG_CAPACITY + 50 {
            status.add_log(format!("line {i}"));
        }
        assert_eq!(status.logs.len(), LOG_CAPACITY);
        assert!(status.logs.back().unwrap().contains("line 249"));
    }

    #[test]
    fn snapshot_bounds_trades_and_logs() {
        let mut status = BotStatus::new();
        let now = OffsetDateTime::now_utc();
        for _ in 0..40 {
            status.record_trade(trade_at(now, dec!(0.1), TradeStatus::Simulated));
        }
        for i in 0..100 {
            status.add_log(format!("line {i}"));
        }

        let snapshot = status.snapshot(
            true,
            true,
            BTreeMap::new(),
            Vec::new(),
            crate::engine::merger::MergeTracker::new(true).snapshot(),
        );

        assert_eq!(snapshot.recent_trades.len(), TRADE_TAIL);
        assert_eq!(snapshot.logs.len(), LOG_TAIL);
        assert_eq!(snapshot.total_trades, 40);
        assert_eq!(snapshot.mode, "simulation");
    }
}
