//! Exchange client boundary.
//!
//! Everything the engine needs from the exchange is behind one trait:
//! order book queries, order submission, and on-chain position merges.
//! Dry-run and live trading are two implementations of the same interface,
//! injected at startup; the execution path never branches on mode.

pub mod clob;
pub mod mock;
pub mod sim;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ExchangeError;
use crate::orderbook::OutcomeBook;

pub use clob::ClobClient;
pub use mock::{MockBook, MockBookBuilder, MockExchange, ScriptedFill};
pub use sim::SimExchange;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order.
    #[strum(serialize = "BUY", serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(serialize = "SELL", serialize = "sell")]
    Sell,
}

/// Order time-in-force.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Fill-or-kill: fills entirely at the limit or better, or cancels
    /// with zero effect.
    #[default]
    #[strum(serialize = "FOK", serialize = "fok")]
    Fok,
    /// Good-till-cancelled: rests on the book until filled or cancelled.
    #[strum(serialize = "GTC", serialize = "gtc")]
    Gtc,
}

/// Order parameters for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderParams {
    /// Token ID to trade.
    pub token_id: String,
    /// Order side (buy/sell).
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Order size in shares.
    pub size: Decimal,
    /// Time-in-force.
    pub tif: TimeInForce,
}

impl OrderParams {
    /// Create a fill-or-kill buy order.
    pub fn buy(token_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side: Side::Buy,
            price,
            size,
            tif: TimeInForce::Fok,
        }
    }

    /// Create a fill-or-kill sell order.
    pub fn sell(token_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side: Side::Sell,
            price,
            size,
            tif: TimeInForce::Fok,
        }
    }

    /// Set time-in-force.
    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    /// Notional value of the order in USD.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_id.is_empty() {
            return Err("token_id is required".to_string());
        }
        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE {
            return Err(format!("price must be in (0, 1), got {}", self.price));
        }
        if self.size <= Decimal::ZERO {
            return Err(format!("size must be positive, got {}", self.size));
        }
        Ok(())
    }
}

/// Result of an order submission.
///
/// `filled == false` with an `order_id` means a GTC order is resting on the
/// book; `filled == false` without one means a fill-or-kill was killed.
/// Transport failures and outright rejections surface as [`ExchangeError`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    /// Whether the order filled completely.
    pub filled: bool,
    /// Achieved fill price (the limit price when simulated).
    pub fill_price: Decimal,
    /// Filled size in shares.
    pub fill_size: Decimal,
    /// Exchange order id, when one was assigned.
    pub order_id: Option<String>,
}

impl OrderFill {
    /// A killed fill-or-kill: no fill, no resting order.
    pub fn killed() -> Self {
        Self {
            filled: false,
            fill_price: Decimal::ZERO,
            fill_size: Decimal::ZERO,
            order_id: None,
        }
    }

    /// A complete fill at the given price.
    pub fn complete(price: Decimal, size: Decimal, order_id: impl Into<String>) -> Self {
        Self {
            filled: true,
            fill_price: price,
            fill_size: size,
            order_id: Some(order_id.into()),
        }
    }

    /// A GTC order resting on the book.
    pub fn resting(order_id: impl Into<String>) -> Self {
        Self {
            filled: false,
            fill_price: Decimal::ZERO,
            fill_size: Decimal::ZERO,
            order_id: Some(order_id.into()),
        }
    }
}

/// Receipt for an on-chain merge submission.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReceipt {
    /// Whether the merge transaction succeeded.
    pub success: bool,
    /// On-chain transaction reference, when available.
    pub tx_ref: Option<String>,
}

/// The exchange/ledger boundary consumed by the engine.
///
/// All operations are fallible network calls with bounded timeouts; a
/// timeout is an error, never a hang.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Fetch the L2 order book for a token.
    async fn get_book(&self, token_id: &str) -> Result<OutcomeBook, ExchangeError>;

    /// Submit an order and report its fill outcome.
    async fn submit_order(&self, params: &OrderParams) -> Result<OrderFill, ExchangeError>;

    /// Merge `amount` share pairs of a condition back into collateral.
    async fn submit_merge(
        &self,
        condition_id: &str,
        amount: Decimal,
    ) -> Result<MergeReceipt, ExchangeError>;
}
