//! REST exchange client over the CLOB API.
//!
//! Order signing and on-chain transaction assembly live on the exchange
//! side of the boundary; this client authenticates with API-key headers and
//! treats every call as a fallible, timeout-bounded network operation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::{ExchangeClient, MergeReceipt, OrderFill, OrderParams, Side, TimeInForce};
use crate::config::Config;
use crate::error::ExchangeError;
use crate::market::Outcome;
use crate::orderbook::{OutcomeBook, PriceLevel};

/// REST client for the CLOB exchange API.
#[derive(Debug, Clone)]
pub struct ClobClient {
    /// Pooled HTTP client with bounded timeouts.
    http: reqwest::Client,
    /// CLOB API base URL.
    clob_url: String,
    /// API credentials, when configured.
    api_key: Option<String>,
    api_secret: Option<String>,
    api_passphrase: Option<String>,
    /// Funder address passed through on merges.
    funder: Option<String>,
    /// Request timeout, reported on expiry.
    timeout_ms: u64,
}

/// Order book response from the API.
#[derive(Debug, Clone, Deserialize)]
struct BookResponse {
    bids: Option<Vec<RawLevel>>,
    asks: Option<Vec<RawLevel>>,
}

/// Single price level as returned by the API.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawLevel {
    price: String,
    size: String,
}

/// Order submission request body.
#[derive(Debug, Clone, Serialize)]
struct OrderRequest {
    token_id: String,
    side: String,
    price: String,
    size: String,
    order_type: String,
}

/// Order submission response.
#[derive(Debug, Clone, Deserialize)]
struct OrderResponse {
    #[serde(alias = "orderID", alias = "orderId", alias = "id")]
    order_id: Option<String>,
    #[serde(default)]
    filled: Option<bool>,
    #[serde(alias = "fillPrice", alias = "avg_price")]
    fill_price: Option<String>,
    #[serde(alias = "fillSize", alias = "size_matched")]
    fill_size: Option<String>,
    status: Option<String>,
    error: Option<String>,
}

/// Merge submission request body.
#[derive(Debug, Clone, Serialize)]
struct MergeRequest {
    condition_id: String,
    amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    funder: Option<String>,
}

/// Merge submission response.
#[derive(Debug, Clone, Deserialize)]
struct MergeResponse {
    #[serde(default)]
    success: bool,
    #[serde(alias = "txHash", alias = "transactionHash")]
    tx_ref: Option<String>,
    error: Option<String>,
}

impl ClobClient {
    /// Create a client from config with pooled, low-latency HTTP settings.
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.http_timeout_ms))
            .connect_timeout(std::time::Duration::from_millis(500))
            .tcp_nodelay(true)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .pool_max_idle_per_host(config.http_pool_size)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .expect("failed to create HTTP client");

        Self {
            http,
            clob_url: config.clob_url.clone(),
            api_key: config.exchange_api_key.clone(),
            api_secret: config.exchange_api_secret.clone(),
            api_passphrase: config.exchange_api_passphrase.clone(),
            funder: config.funder_address.clone(),
            timeout_ms: config.http_timeout_ms,
        }
    }

    /// Get the shared HTTP client (reused by the market feed).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Attach API-key auth headers when credentials are configured.
    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }
        if let Some(secret) = &self.api_secret {
            request = request.header("X-Api-Secret", secret);
        }
        if let Some(passphrase) = &self.api_passphrase {
            request = request.header("X-Api-Passphrase", passphrase);
        }
        request
    }

    fn map_send_error(&self, e: reqwest::Error) -> ExchangeError {
        if e.is_timeout() {
            ExchangeError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            ExchangeError::SubmissionFailed(e.to_string())
        }
    }

    fn parse_levels(levels: Option<Vec<RawLevel>>) -> Vec<PriceLevel> {
        levels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|level| {
                let price: Decimal = level.price.parse().ok()?;
                let size: Decimal = level.size.parse().ok()?;
                (size > Decimal::ZERO).then_some(PriceLevel { price, size })
            })
            .collect()
    }
}

#[async_trait]
impl ExchangeClient for ClobClient {
    #[instrument(skip(self), fields(token_id = %token_id))]
    async fn get_book(&self, token_id: &str) -> Result<OutcomeBook, ExchangeError> {
        let start = std::time::Instant::now();
        let url = format!("{}/book", self.clob_url);

        let response = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExchangeError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    ExchangeError::BookFetchFailed {
                        token_id: token_id.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(ExchangeError::BookFetchFailed {
                token_id: token_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let book: BookResponse =
            response
                .json()
                .await
                .map_err(|e| ExchangeError::BookFetchFailed {
                    token_id: token_id.to_string(),
                    reason: format!("parse: {e}"),
                })?;

        let mut bids = Self::parse_levels(book.bids);
        let mut asks = Self::parse_levels(book.asks);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        crate::metrics::record_book_fetch_latency(start, token_id);

        Ok(OutcomeBook {
            token_id: token_id.to_string(),
            // The caller knows which side this token is; Up is a placeholder.
            outcome: Outcome::Up,
            bids,
            asks,
            updated_at: OffsetDateTime::now_utc(),
        })
    }

    #[instrument(skip(self, params), fields(token = %params.token_id, side = %params.side, tif = %params.tif))]
    async fn submit_order(&self, params: &OrderParams) -> Result<OrderFill, ExchangeError> {
        params.validate().map_err(ExchangeError::InvalidParams)?;

        let start = std::time::Instant::now();
        crate::metrics::inc_orders_submitted();

        let body = OrderRequest {
            token_id: params.token_id.clone(),
            side: match params.side {
                Side::Buy => "BUY".to_string(),
                Side::Sell => "SELL".to_string(),
            },
            price: params.price.to_string(),
            size: params.size.to_string(),
            order_type: match params.tif {
                TimeInForce::Fok => "FOK".to_string(),
                TimeInForce::Gtc => "GTC".to_string(),
            },
        };

        let url = format!("{}/order", self.clob_url);
        let response = self
            .authed(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExchangeError::RateLimited {
                retry_after_seconds: 1,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            crate::metrics::inc_orders_failed();
            return Err(ExchangeError::SubmissionFailed(format!(
                "HTTP {status} - {text}"
            )));
        }

        let parsed: OrderResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::SubmissionFailed(format!("parse: {e}")))?;

        if let Some(error) = parsed.error {
            crate::metrics::inc_orders_failed();
            return Err(ExchangeError::OrderRejected { reason: error });
        }

        crate::metrics::record_order_submit_latency(start);

        // A killed FOK comes back unfilled with a terminal status; a resting
        // GTC comes back unfilled with a live order id.
        let filled = parsed
            .filled
            .unwrap_or_else(|| matches!(parsed.status.as_deref(), Some("matched" | "filled")));

        if !filled {
            debug!(status = ?parsed.status, "Order not filled");
            if params.tif == TimeInForce::Gtc {
                if let Some(order_id) = parsed.order_id {
                    return Ok(OrderFill::resting(order_id));
                }
            }
            return Ok(OrderFill::killed());
        }

        let fill_price = parsed
            .fill_price
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(params.price);
        let fill_size = parsed
            .fill_size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(params.size);

        crate::metrics::inc_orders_filled();
        info!(
            order_id = ?parsed.order_id,
            fill_price = %fill_price,
            fill_size = %fill_size,
            "Order filled"
        );

        Ok(OrderFill {
            filled: true,
            fill_price,
            fill_size,
            order_id: parsed.order_id,
        })
    }

    #[instrument(skip(self), fields(condition_id = %condition_id, amount = %amount))]
    async fn submit_merge(
        &self,
        condition_id: &str,
        amount: Decimal,
    ) -> Result<MergeReceipt, ExchangeError> {
        let body = MergeRequest {
            condition_id: condition_id.to_string(),
            amount: amount.to_string(),
            funder: self.funder.clone(),
        };

        let url = format!("{}/merge-positions", self.clob_url);
        let response = self
            .authed(self.http.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::MergeFailed {
                condition_id: condition_id.to_string(),
                reason: format!("HTTP {status} - {text}"),
            });
        }

        let parsed: MergeResponse =
            response
                .json()
                .await
                .map_err(|e| ExchangeError::MergeFailed {
                    condition_id: condition_id.to_string(),
                    reason: format!("parse: {e}"),
                })?;

        if let Some(error) = parsed.error {
            warn!(error = %error, "Merge rejected");
            return Ok(MergeReceipt {
                success: false,
                tx_ref: parsed.tx_ref,
            });
        }

        Ok(MergeReceipt {
            success: parsed.success,
            tx_ref: parsed.tx_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_levels_drops_zero_and_garbage() {
        let raw = vec![
            RawLevel {
                price: "0.48".to_string(),
                size: "100".to_string(),
            },
            RawLevel {
                price: "0.49".to_string(),
                size: "0".to_string(),
            },
            RawLevel {
                price: "not-a-number".to_string(),
                size: "10".to_string(),
            },
        ];

        let levels = ClobClient::parse_levels(Some(raw));
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].price, Decimal::new(48, 2));
    }

    #[test]
    fn order_response_aliases_parse() {
        let json = r#"{"orderID":"abc123","status":"matched","size_matched":"10"}"#;
        let parsed: OrderResponse = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.order_id.as_deref(), Some("abc123"));
        assert_eq!(parsed.status.as_deref(), Some("matched"));
        assert_eq!(parsed.fill_size.as_deref(), Some("10"));
    }

    #[test]
    fn merge_response_parses_tx_ref() {
        let json = r#"{"success":true,"txHash":"0xdead"}"#;
        let parsed: MergeResponse = serde_json::from_str(json).unwrap();

        assert!(parsed.success);
        assert_eq!(parsed.tx_ref.as_deref(), Some("0xdead"));
    }
}
