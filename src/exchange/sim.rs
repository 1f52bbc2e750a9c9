//! Simulated exchange client for dry-run mode.
//!
//! Delegates order book reads to an inner client so the engine sees real
//! prices, but fills every order at its limit price without touching the
//! network. Control flow through the engine is identical to live mode;
//! only this final submission step differs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use super::{ExchangeClient, MergeReceipt, OrderFill, OrderParams};
use crate::error::ExchangeError;
use crate::orderbook::OutcomeBook;

/// Dry-run exchange: real reads, simulated writes.
pub struct SimExchange {
    inner: Arc<dyn ExchangeClient>,
    order_seq: AtomicU64,
}

impl SimExchange {
    /// Wrap an inner client whose book reads are passed through.
    pub fn new(inner: Arc<dyn ExchangeClient>) -> Self {
        Self {
            inner,
            order_seq: AtomicU64::new(1),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("sim-{prefix}-{}", self.order_seq.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl ExchangeClient for SimExchange {
    async fn get_book(&self, token_id: &str) -> Result<OutcomeBook, ExchangeError> {
        self.inner.get_book(token_id).await
    }

    async fn submit_order(&self, params: &OrderParams) -> Result<OrderFill, ExchangeError> {
        params.validate().map_err(ExchangeError::InvalidParams)?;

        let order_id = self.next_id("order");
        info!(
            order_id = %order_id,
            token = %params.token_id,
            side = %params.side,
            price = %params.price,
            size = %params.size,
            "SIMULATED order fill"
        );

        Ok(OrderFill::complete(params.price, params.size, order_id))
    }

    async fn submit_merge(
        &self,
        condition_id: &str,
        amount: Decimal,
    ) -> Result<MergeReceipt, ExchangeError> {
        let tx_ref = self.next_id("merge");
        info!(
            condition_id = %condition_id,
            amount = %amount,
            tx_ref = %tx_ref,
            "SIMULATED merge"
        );

        Ok(MergeReceipt {
            success: true,
            tx_ref: Some(tx_ref),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockBookBuilder;
    use crate::exchange::MockExchange;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn sim_fills_at_limit_price() {
        let mock = Arc::new(MockExchange::new());
        let sim = SimExchange::new(mock);

        let params = OrderParams::buy("token", dec!(0.48), dec!(20));
        let fill = sim.submit_order(&params).await.unwrap();

        assert!(fill.filled);
        assert_eq!(fill.fill_price, dec!(0.48));
        assert_eq!(fill.fill_size, dec!(20));
        assert!(fill.order_id.unwrap().starts_with("sim-order-"));
    }

    #[tokio::test]
    async fn sim_merge_succeeds() {
        let mock = Arc::new(MockExchange::new());
        let sim = SimExchange::new(mock);

        let receipt = sim.submit_merge("0xc0ffee", dec!(10)).await.unwrap();
        assert!(receipt.success);
        assert!(receipt.tx_ref.is_some());
    }

    #[tokio::test]
    async fn sim_delegates_book_reads() {
        let mock = Arc::new(MockExchange::new());
        mock.set_book(
            MockBookBuilder::new("token")
                .ask(dec!(0.50), dec!(100))
                .build(),
        );
        let sim = SimExchange::new(mock);

        let book = sim.get_book("token").await.unwrap();
        assert_eq!(book.best_ask(), Some(dec!(0.50)));
    }
}
