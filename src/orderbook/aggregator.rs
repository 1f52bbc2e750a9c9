//! Fill price and depth calculations over order book levels.

use rust_decimal::Decimal;
use tracing::instrument;

use super::types::{FillInfo, PriceLevel};
use crate::error::ExchangeError;

/// Calculate worst-case fill price by walking the ask book.
///
/// Returns VWAP and the worst price level needed to fill `target_size`.
/// The worst price is what a fill-or-kill limit must be set to.
#[instrument(skip(asks), fields(target_size = %target_size))]
pub fn calculate_fill_price(
    asks: &[PriceLevel],
    target_size: Decimal,
) -> Result<FillInfo, ExchangeError> {
    if target_size <= Decimal::ZERO {
        return Err(ExchangeError::InvalidParams(format!(
            "fill size must be positive, got {target_size}"
        )));
    }

    if asks.is_empty() {
        return Err(ExchangeError::InsufficientLiquidity {
            required: target_size,
            available: Decimal::ZERO,
        });
    }

    let mut remaining = target_size;
    let mut total_cost = Decimal::ZERO;
    let mut worst_price = Decimal::ZERO;
    let best_price = asks.first().map(|l| l.price);

    for level in asks {
        if remaining.is_zero() {
            break;
        }

        let fill_size = remaining.min(level.size);
        total_cost += fill_size * level.price;
        remaining -= fill_size;
        worst_price = level.price;
    }

    if !remaining.is_zero() {
        return Err(ExchangeError::InsufficientLiquidity {
            available: target_size - remaining,
            required: target_size,
        });
    }

    Ok(FillInfo {
        filled_size: target_size,
        total_cost,
        vwap: total_cost / target_size,
        worst_price,
        best_price,
    })
}

/// Revenue from selling `size` into the bid book, or None if the bids
/// cannot absorb it.
pub fn calculate_sell_revenue(bids: &[PriceLevel], size: Decimal) -> Option<Decimal> {
    if size <= Decimal::ZERO || bids.is_empty() {
        return None;
    }

    let mut remaining = size;
    let mut total_revenue = Decimal::ZERO;

    for level in bids {
        if remaining.is_zero() {
            break;
        }

        let fill_size = remaining.min(level.size);
        total_revenue += fill_size * level.price;
        remaining -= fill_size;
    }

    if remaining.is_zero() {
        Some(total_revenue)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fill_price_single_level() {
        let asks = vec![PriceLevel::new(dec!(0.50), dec!(100))];
        let result = calculate_fill_price(&asks, dec!(10)).unwrap();

        assert_eq!(result.vwap, dec!(0.50));
        assert_eq!(result.worst_price, dec!(0.50));
        assert_eq!(result.total_cost, dec!(5.0));
        assert_eq!(result.filled_size, dec!(10));
    }

    #[test]
    fn fill_price_walks_multiple_levels() {
        let asks = vec![
            PriceLevel::new(dec!(0.48), dec!(5)),
            PriceLevel::new(dec!(0.49), dec!(5)),
            PriceLevel::new(dec!(0.50), dec!(10)),
        ];
        let result = calculate_fill_price(&asks, dec!(10)).unwrap();

        // 5 @ 0.48 + 5 @ 0.49 = 4.85
        assert_eq!(result.total_cost, dec!(4.85));
        assert_eq!(result.vwap, dec!(0.485));
        assert_eq!(result.worst_price, dec!(0.49));
    }

    #[test]
    fn fill_price_insufficient_liquidity() {
        let asks = vec![PriceLevel::new(dec!(0.50), dec!(5))];
        let result = calculate_fill_price(&asks, dec!(10));

        assert!(matches!(
            result,
            Err(ExchangeError::InsufficientLiquidity { .. })
        ));
    }

    #[test]
    fn fill_price_rejects_zero_size() {
        let asks = vec![PriceLevel::new(dec!(0.50), dec!(100))];
        assert!(matches!(
            calculate_fill_price(&asks, dec!(0)),
            Err(ExchangeError::InvalidParams(_))
        ));
    }

    #[test]
    fn sell_revenue_walks_bids() {
        let bids = vec![
            PriceLevel::new(dec!(0.48), dec!(50)),
            PriceLevel::new(dec!(0.47), dec!(50)),
        ];

        // 50 @ 0.48 + 25 @ 0.47 = 35.75
        assert_eq!(calculate_sell_revenue(&bids, dec!(75)), Some(dec!(35.75)));
        assert_eq!(calculate_sell_revenue(&bids, dec!(200)), None);
    }
}
