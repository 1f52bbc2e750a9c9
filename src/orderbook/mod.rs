//! Order book data structures and calculations.
//!
//! This module handles:
//! - Order book types and depth accounting
//! - Fill price and sell revenue calculations

pub mod aggregator;
pub mod types;

pub use aggregator::{calculate_fill_price, calculate_sell_revenue};
pub use types::{FillInfo, OutcomeBook, PriceLevel, DEPTH_LEVELS};
