//! Market discovery and per-cycle quote refresh.
//!
//! Discovery queries the Gamma catalog by computed slug patterns for each
//! whitelisted symbol, with a substring search as fallback. A symbol or
//! market that fails to resolve is logged and skipped; it never aborts the
//! cycle for the others.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::types::{GammaMarket, Market};
use crate::error::MarketError;
use crate::exchange::ExchangeClient;
use crate::market::Outcome;

/// 15-minute market window in seconds.
const WINDOW_SECONDS: i64 = 900;

/// Window-boundary offsets (minutes) probed around now during discovery.
const WINDOW_OFFSETS_MIN: [i64; 6] = [-15, 0, 15, 30, 45, 60];

static SLUG_TS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+-updown-15m-(\d+)$").expect("valid regex"));

/// Top-of-book snapshot for one market, refreshed each cycle.
#[derive(Debug, Clone, Copy)]
pub struct PairQuote {
    /// Best ask on the UP token.
    pub up_ask: Decimal,
    /// Best ask on the DOWN token.
    pub down_ask: Decimal,
    /// Quoted depth on the UP ask side.
    pub up_depth: Decimal,
    /// Quoted depth on the DOWN ask side.
    pub down_depth: Decimal,
    /// When the books were fetched.
    pub fetched_at: OffsetDateTime,
}

impl PairQuote {
    /// Combined cost of buying one share of each side at the quoted asks.
    pub fn total_cost(&self) -> Decimal {
        self.up_ask + self.down_ask
    }

    /// Ask price for one side.
    pub fn ask(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Up => self.up_ask,
            Outcome::Down => self.down_ask,
        }
    }

    /// Quoted depth for one side.
    pub fn depth(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Up => self.up_depth,
            Outcome::Down => self.down_depth,
        }
    }
}

/// Discovers eligible markets and refreshes their quotes.
#[derive(Debug, Clone)]
pub struct MarketFeed {
    http: reqwest::Client,
    gamma_url: String,
    symbols: Vec<String>,
}

impl MarketFeed {
    /// Create a feed over the given Gamma endpoint and symbol whitelist.
    pub fn new(http: reqwest::Client, gamma_url: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            http,
            gamma_url: gamma_url.into(),
            symbols,
        }
    }

    /// Discover the current set of eligible markets.
    ///
    /// Filtered by symbol whitelist and `min_time_remaining`, deduplicated
    /// by condition id, sorted soonest-expiring first. One symbol's failure
    /// is isolated; the call only errors when every symbol failed, which
    /// the caller treats as loss of catalog connectivity.
    #[instrument(skip(self))]
    pub async fn discover(&self, min_time_remaining: i64) -> Result<Vec<Market>, MarketError> {
        let mut markets: Vec<Market> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut failures = 0usize;

        for symbol in &self.symbols {
            let found = match self.discover_symbol(symbol).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Symbol discovery failed, skipping");
                    failures += 1;
                    continue;
                }
            };

            for market in found {
                if market.time_remaining_seconds() < min_time_remaining {
                    continue;
                }
                if seen.insert(market.condition_id.clone()) {
                    markets.push(market);
                }
            }
        }

        if !self.symbols.is_empty() && failures == self.symbols.len() {
            return Err(MarketError::NoMarketsFound);
        }

        markets.sort_by_key(|m| m.end_timestamp);
        debug!(count = markets.len(), "Discovery complete");
        Ok(markets)
    }

    /// Discover markets for one symbol: computed slugs first, search fallback.
    async fn discover_symbol(&self, symbol: &str) -> Result<Vec<Market>, reqwest::Error> {
        let mut markets = self.find_by_computed_slugs(symbol).await?;

        if markets.is_empty() {
            markets = self.find_by_search(symbol).await?;
        }

        Ok(markets)
    }

    /// Probe computed window-boundary slugs against the catalog.
    async fn find_by_computed_slugs(&self, symbol: &str) -> Result<Vec<Market>, reqwest::Error> {
        let mut markets = Vec::new();

        for ts in window_timestamps() {
            let slug = format!("{symbol}-updown-15m-{ts}");
            let url = format!("{}/markets", self.gamma_url);

            let response = match self.http.get(&url).query(&[("slug", slug.as_str())]).send().await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(slug = %slug, error = %e, "Slug probe failed");
                    continue;
                }
            };

            if !response.status().is_success() {
                continue;
            }

            let found: Vec<GammaMarket> = match response.json().await {
                Ok(f) => f,
                Err(e) => {
                    debug!(slug = %slug, error = %e, "Slug probe parse failed");
                    continue;
                }
            };

            markets.extend(found.into_iter().filter_map(|g| g.into_market(symbol)));
        }

        Ok(markets)
    }

    /// Catalog search by slug substring.
    async fn find_by_search(&self, symbol: &str) -> Result<Vec<Market>, reqwest::Error> {
        let url = format!("{}/markets", self.gamma_url);
        let pattern = format!("{symbol}-updown-15m");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("active", "true"),
                ("closed", "false"),
                ("limit", "50"),
                ("slug_contains", pattern.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(symbol = %symbol, status = %response.status(), "Search returned non-success");
            return Ok(Vec::new());
        }

        let found: Vec<GammaMarket> = match response.json().await {
            Ok(f) => f,
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "Search parse failed");
                return Ok(Vec::new());
            }
        };

        Ok(found
            .into_iter()
            .filter(|g| {
                g.slug
                    .as_deref()
                    .map(|s| s.contains(&pattern))
                    .unwrap_or(false)
            })
            .filter_map(|g| g.into_market(symbol))
            .collect())
    }

    /// Refresh top-of-book pricing for one market.
    ///
    /// Returns None when either side has no tradeable asks; the market is
    /// excluded from this cycle only and re-attempted next cycle.
    #[instrument(skip(self, client), fields(slug = %market.slug))]
    pub async fn refresh_quote(
        &self,
        client: &dyn ExchangeClient,
        market: &Market,
    ) -> Option<PairQuote> {
        let (up_result, down_result) = tokio::join!(
            client.get_book(&market.up_token_id),
            client.get_book(&market.down_token_id),
        );

        let up_book = match up_result {
            Ok(book) => book,
            Err(e) => {
                warn!(error = %e, "UP book fetch failed");
                return None;
            }
        };

        let down_book = match down_result {
            Ok(book) => book,
            Err(e) => {
                warn!(error = %e, "DOWN book fetch failed");
                return None;
            }
        };

        if !up_book.has_asks() || !down_book.has_asks() {
            debug!("Missing or zero-depth asks, excluding for this cycle");
            return None;
        }

        Some(PairQuote {
            up_ask: up_book.best_ask()?,
            down_ask: down_book.best_ask()?,
            up_depth: up_book.ask_depth(),
            down_depth: down_book.ask_depth(),
            fetched_at: OffsetDateTime::now_utc(),
        })
    }
}

/// Candidate 15-minute window-end timestamps around now.
fn window_timestamps() -> Vec<i64> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let boundary = (now / WINDOW_SECONDS) * WINDOW_SECONDS;

    WINDOW_OFFSETS_MIN
        .iter()
        .map(|offset| boundary + offset * 60)
        .collect()
}

/// Extract the window-end timestamp from a market slug.
pub fn slug_timestamp(slug: &str) -> Option<i64> {
    SLUG_TS_RE
        .captures(slug)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn window_timestamps_are_boundary_aligned() {
        for ts in window_timestamps() {
            assert_eq!(ts % WINDOW_SECONDS, 0);
        }
    }

    #[test]
    fn slug_timestamp_parses() {
        assert_eq!(slug_timestamp("btc-updown-15m-1765301400"), Some(1765301400));
        assert_eq!(slug_timestamp("btc-weekly-1765301400"), None);
        assert_eq!(slug_timestamp("not-a-slug"), None);
    }

    #[test]
    fn quote_total_cost_and_sides() {
        let quote = PairQuote {
            up_ask: dec!(0.48),
            down_ask: dec!(0.50),
            up_depth: dec!(100),
            down_depth: dec!(80),
            fetched_at: OffsetDateTime::UNIX_EPOCH,
        };

        assert_eq!(quote.total_cost(), dec!(0.98));
        assert_eq!(quote.ask(Outcome::Up), dec!(0.48));
        assert_eq!(quote.depth(Outcome::Down), dec!(80));
    }
}
