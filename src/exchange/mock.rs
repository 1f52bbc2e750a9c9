//! Scripted exchange client for unit and integration testing.
//!
//! Books are set per token; order outcomes can be scripted per token as a
//! FIFO queue (fill, kill, error). Unscripted orders fill completely at
//! their limit price. Every submitted order and merge is logged for
//! assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::{ExchangeClient, MergeReceipt, OrderFill, OrderParams};
use crate::error::ExchangeError;
use crate::market::Outcome;
use crate::orderbook::{OutcomeBook, PriceLevel};

/// Mock order book data.
#[derive(Debug, Clone)]
pub struct MockBook {
    /// Token ID.
    pub token_id: String,
    /// Bid levels, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first.
    pub asks: Vec<PriceLevel>,
}

/// Scripted outcome for one order submission.
#[derive(Debug, Clone)]
pub enum ScriptedFill {
    /// Fill completely at the order's limit price.
    Fill,
    /// Fill completely at a specific price.
    FillAt(Decimal),
    /// Kill a fill-or-kill (or reject a resting order with no id).
    Kill,
    /// Rest on the book (GTC).
    Rest,
    /// Fail with a submission error.
    Error(String),
}

/// Scripted exchange client for tests.
pub struct MockExchange {
    books: Mutex<HashMap<String, MockBook>>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedFill>>>,
    orders: Mutex<Vec<OrderParams>>,
    merges: Mutex<Vec<(String, Decimal)>>,
    fail_merge: Mutex<bool>,
    reject_merge: Mutex<bool>,
    order_seq: AtomicU64,
}

impl MockExchange {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self {
            books: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            merges: Mutex::new(Vec::new()),
            fail_merge: Mutex::new(false),
            reject_merge: Mutex::new(false),
            order_seq: AtomicU64::new(1),
        }
    }

    /// Install a book for a token.
    pub fn set_book(&self, book: MockBook) {
        self.books
            .lock()
            .unwrap()
            .insert(book.token_id.clone(), book);
    }

    /// Queue a scripted outcome for the next order on a token.
    pub fn script_order(&self, token_id: &str, outcome: ScriptedFill) {
        self.scripts
            .lock()
            .unwrap()
            .entry(token_id.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Make merge submissions return a transport error.
    pub fn set_fail_merge(&self, fail: bool) {
        *self.fail_merge.lock().unwrap() = fail;
    }

    /// Make merge submissions come back rejected (success = false).
    pub fn set_reject_merge(&self, reject: bool) {
        *self.reject_merge.lock().unwrap() = reject;
    }

    /// All orders submitted so far.
    pub fn submitted_orders(&self) -> Vec<OrderParams> {
        self.orders.lock().unwrap().clone()
    }

    /// Orders submitted for one token.
    pub fn orders_for(&self, token_id: &str) -> Vec<OrderParams> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.token_id == token_id)
            .cloned()
            .collect()
    }

    /// All merges submitted so far.
    pub fn submitted_merges(&self) -> Vec<(String, Decimal)> {
        self.merges.lock().unwrap().clone()
    }

    fn next_order_id(&self) -> String {
        format!("mock-{}", self.order_seq.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn get_book(&self, token_id: &str) -> Result<OutcomeBook, ExchangeError> {
        let books = self.books.lock().unwrap();
        let (bids, asks) = books
            .get(token_id)
            .map(|b| (b.bids.clone(), b.asks.clone()))
            .unwrap_or_default();

        Ok(OutcomeBook {
            token_id: token_id.to_string(),
            outcome: Outcome::Up,
            bids,
            asks,
            updated_at: OffsetDateTime::now_utc(),
        })
    }

    async fn submit_order(&self, params: &OrderParams) -> Result<OrderFill, ExchangeError> {
        params.validate().map_err(ExchangeError::InvalidParams)?;
        self.orders.lock().unwrap().push(params.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&params.token_id)
            .and_then(|queue| queue.pop_front());

        match scripted {
            None | Some(ScriptedFill::Fill) => Ok(OrderFill::complete(
                params.price,
                params.size,
                self.next_order_id(),
            )),
            Some(ScriptedFill::FillAt(price)) => {
                Ok(OrderFill::complete(price, params.size, self.next_order_id()))
            }
            Some(ScriptedFill::Kill) => Ok(OrderFill::killed()),
            Some(ScriptedFill::Rest) => Ok(OrderFill::resting(self.next_order_id())),
            Some(ScriptedFill::Error(reason)) => Err(ExchangeError::SubmissionFailed(reason)),
        }
    }

    async fn submit_merge(
        &self,
        condition_id: &str,
        amount: Decimal,
    ) -> Result<MergeReceipt, ExchangeError> {
        if *self.fail_merge.lock().unwrap() {
            return Err(ExchangeError::MergeFailed {
                condition_id: condition_id.to_string(),
                reason: "mock merge transport failure".to_string(),
            });
        }

        self.merges
            .lock()
            .unwrap()
            .push((condition_id.to_string(), amount));

        if *self.reject_merge.lock().unwrap() {
            return Ok(MergeReceipt {
                success: false,
                tx_ref: None,
            });
        }

        Ok(MergeReceipt {
            success: true,
            tx_ref: Some(format!("0xmock{}", self.order_seq.fetch_add(1, Ordering::Relaxed))),
        })
    }
}

/// Builder for mock order books.
pub struct MockBookBuilder {
    token_id: String,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl MockBookBuilder {
    /// Start a book for the given token.
    pub fn new(token_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Add a bid level.
    pub fn bid(mut self, price: Decimal, size: Decimal) -> Self {
        self.bids.push(PriceLevel { price, size });
        self
    }

    /// Add an ask level.
    pub fn ask(mut self, price: Decimal, size: Decimal) -> Self {
        self.asks.push(PriceLevel { price, size });
        self
    }

    /// Build with levels in book order (bids descending, asks ascending).
    pub fn build(mut self) -> MockBook {
        self.bids.sort_by(|a, b| b.price.cmp(&a.price));
        self.asks.sort_by(|a, b| a.price.cmp(&b.price));

        MockBook {
            token_id: self.token_id,
            bids: self.bids,
            asks: self.asks,
        }
    }
}
