//! Prometheus metrics for the engine.
//!
//! Counters for order and strategy activity, histograms for the latencies
//! that bound how fast an opportunity can be acted on.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

/// Scan cycle latency metric name.
pub const METRIC_CYCLE_LATENCY: &str = "scan_cycle_latency_ms";
/// Order book fetch latency metric name.
pub const METRIC_BOOK_FETCH_LATENCY: &str = "book_fetch_latency_ms";
/// Order submission latency metric name.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "order_submit_latency_ms";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders filled counter metric name.
pub const METRIC_ORDERS_FILLED: &str = "orders_filled_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities executed counter metric name.
pub const METRIC_OPPORTUNITIES_EXECUTED: &str = "opportunities_executed_total";
/// Unwind attempts counter metric name.
pub const METRIC_UNWINDS: &str = "unwinds_total";
/// Bargain buys counter metric name.
pub const METRIC_BARGAIN_BUYS: &str = "bargain_buys_total";
/// Stop-losses fired counter metric name.
pub const METRIC_STOP_LOSSES: &str = "stop_losses_total";
/// Merges confirmed counter metric name.
pub const METRIC_MERGES: &str = "merges_total";

/// Register metric descriptions. Call once at startup.
pub fn init_metrics() {
    describe_histogram!(METRIC_CYCLE_LATENCY, "Full scan cycle latency in milliseconds");
    describe_histogram!(METRIC_BOOK_FETCH_LATENCY, "Order book fetch latency in milliseconds");
    describe_histogram!(
        METRIC_ORDER_SUBMIT_LATENCY,
        "Order submission latency in milliseconds"
    );

    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total orders submitted");
    describe_counter!(METRIC_ORDERS_FILLED, "Total orders filled");
    describe_counter!(METRIC_ORDERS_FAILED, "Total orders that failed");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total viable arbitrage opportunities detected"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_EXECUTED,
        "Total arbitrage opportunities fully executed"
    );
    describe_counter!(METRIC_UNWINDS, "Total compensating unwind attempts");
    describe_counter!(METRIC_BARGAIN_BUYS, "Total bargain legs bought");
    describe_counter!(METRIC_STOP_LOSSES, "Total bargain stop-losses fired");
    describe_counter!(METRIC_MERGES, "Total confirmed position merges");

    debug!("Metrics initialized");
}

/// Record full scan cycle latency.
pub fn record_cycle_latency(start: Instant) {
    histogram!(METRIC_CYCLE_LATENCY).record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Record order book fetch latency.
pub fn record_book_fetch_latency(start: Instant, token_id: &str) {
    histogram!(METRIC_BOOK_FETCH_LATENCY, "token_id" => token_id.to_string())
        .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Record order submission latency.
pub fn record_order_submit_latency(start: Instant) {
    histogram!(METRIC_ORDER_SUBMIT_LATENCY).record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Increment orders submitted.
pub fn inc_orders_submitted() {
    counter!(METRIC_ORDERS_SUBMITTED).increment(1);
}

/// Increment orders filled.
pub fn inc_orders_filled() {
    counter!(METRIC_ORDERS_FILLED).increment(1);
}

/// Increment orders failed.
pub fn inc_orders_failed() {
    counter!(METRIC_ORDERS_FAILED).increment(1);
}

/// Increment opportunities detected.
pub fn inc_opportunities_detected() {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(1);
}

/// Increment opportunities executed.
pub fn inc_opportunities_executed() {
    counter!(METRIC_OPPORTUNITIES_EXECUTED).increment(1);
}

/// Increment unwind attempts.
pub fn inc_unwinds() {
    counter!(METRIC_UNWINDS).increment(1);
}

/// Increment bargain buys.
pub fn inc_bargain_buys() {
    counter!(METRIC_BARGAIN_BUYS).increment(1);
}

/// Increment stop-losses fired.
pub fn inc_stop_losses() {
    counter!(METRIC_STOP_LOSSES).increment(1);
}

/// Increment confirmed merges.
pub fn inc_merges() {
    counter!(METRIC_MERGES).increment(1);
}
