//! Unified error types for the arbitrage engine.

use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the arbitrage engine.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Market discovery/refresh error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Exchange client error.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// State persistence error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Market discovery and refresh errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// No eligible market could be found for any configured symbol.
    #[error("no eligible markets found")]
    NoMarketsFound,

    /// Failed to fetch market information.
    #[error("failed to fetch market {slug}: {reason}")]
    FetchFailed {
        /// The market slug that failed.
        slug: String,
        /// Reason for failure.
        reason: String,
    },

    /// Market is past its expiry.
    #[error("market {slug} has expired")]
    Expired {
        /// The expired market slug.
        slug: String,
    },

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Exchange client errors (order book, order submission, merge).
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Order book fetch failed.
    #[error("book fetch failed for {token_id}: {reason}")]
    BookFetchFailed {
        /// Token whose book could not be fetched.
        token_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Order submission failed.
    #[error("order submission failed: {0}")]
    SubmissionFailed(String),

    /// Order rejected by the exchange.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason from the exchange.
        reason: String,
    },

    /// Request timed out; the call is treated as failed.
    #[error("exchange call timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Rate limited by the API.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// Merge transaction failed or was rejected.
    #[error("merge failed for {condition_id}: {reason}")]
    MergeFailed {
        /// Condition id of the failed merge.
        condition_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Not enough liquidity in the order book.
    #[error("insufficient liquidity: need {required}, available {available}")]
    InsufficientLiquidity {
        /// Required size.
        required: Decimal,
        /// Available size.
        available: Decimal,
    },

    /// Invalid order parameters.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),
}

/// State persistence errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to read the state file.
    #[error("failed to read state from {path}: {source}")]
    ReadFailed {
        /// State file path.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Failed to write the state file.
    #[error("failed to write state to {path}: {source}")]
    WriteFailed {
        /// State file path.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// State file contents could not be parsed.
    #[error("failed to parse state from {path}: {source}")]
    ParseFailed {
        /// State file path.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
