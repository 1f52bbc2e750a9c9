//! Pair-cost arbitrage engine for binary UP/DOWN prediction markets.
//!
//! Binary markets settle at exactly $1.00 per share pair: one of the two
//! outcome tokens pays $1.00, the other pays nothing. Whenever the combined
//! ask of UP and DOWN drops below $1.00, buying both sides locks in the
//! difference regardless of the outcome:
//!
//! ```text
//! UP ask:    $0.48
//! DOWN ask:  $0.50
//! ──────────────────
//! Total:     $0.98 < $1.00
//! Profit:    $0.02 per share pair, guaranteed
//! ```
//!
//! The engine scans eligible markets, evaluates each quote, executes the
//! two legs fill-or-kill with a compensating unwind when only one fills,
//! runs a secondary bargain-accumulation strategy, and merges completed
//! pairs back into collateral.
//!
//! # Modules
//!
//! - [`config`]: Environment configuration and the runtime engine config
//! - [`error`]: Unified error types
//! - [`market`]: Market discovery and quote refresh
//! - [`orderbook`]: Book types and fill calculations
//! - [`exchange`]: Exchange client boundary (live, simulated, mock)
//! - [`engine`]: Evaluator, paired executor, bargain accumulator, merge
//!   tracker, status publisher, and the scan loop
//! - [`storage`]: State persistence across restarts
//! - [`api`]: HTTP control surface
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Shared utilities

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod market;
pub mod metrics;
pub mod orderbook;
pub mod storage;
pub mod utils;

pub use config::{Config, EngineConfig};
pub use error::{BotError, Result};
