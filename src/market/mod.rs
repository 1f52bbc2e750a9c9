//! Market discovery and quote refresh for binary UP/DOWN markets.
//!
//! This module handles:
//! - Market types and catalog DTOs
//! - Slug-pattern discovery against the Gamma API
//! - Per-cycle top-of-book refresh through the exchange client

pub mod feed;
pub mod types;

pub use feed::{slug_timestamp, MarketFeed, PairQuote};
pub use types::{GammaMarket, Market, Outcome};
