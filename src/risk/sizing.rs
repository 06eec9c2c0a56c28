use crate::models::Side;

/// Basis points per unit of price (pips / 10000 = fractional offset)
pub const PIPS_PER_UNIT: f64 = 10_000.0;

/// Stop-loss and take-profit prices for a position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Convert a risk budget into a position size
///
/// `risk_percent` of `balance` is what the position loses if the stop is
/// hit. The size is capped so that `size * entry_price` never exceeds
/// `balance`. A zero stop distance (or any non-positive input) yields 0.
///
/// The balance may move between reading it and submitting an order, so
/// callers re-check `balance >= entry_price * size` right before
/// committing capital.
pub fn calculate_position_size(
    balance: f64,
    risk_percent: f64,
    entry_price: f64,
    stop_price: f64,
) -> f64 {
    if balance <= 0.0 || risk_percent <= 0.0 || entry_price <= 0.0 {
        return 0.0;
    }

    let price_diff = (entry_price - stop_price).abs();
    if price_diff == 0.0 || !price_diff.is_finite() {
        return 0.0;
    }

    let risk_amount = balance * risk_percent / 100.0;
    let size = risk_amount / price_diff;

    // Shaved by a few ULPs so size * entry_price cannot round above balance
    let max_affordable = (balance / entry_price) * (1.0 - 4.0 * f64::EPSILON);

    size.clamp(0.0, max_affordable)
}

/// Derive stop-loss/take-profit prices from pip offsets around `entry_price`
pub fn protective_levels(
    side: Side,
    entry_price: f64,
    stop_loss_pips: f64,
    take_profit_pips: f64,
) -> ProtectiveLevels {
    let sl = stop_loss_pips / PIPS_PER_UNIT;
    let tp = take_profit_pips / PIPS_PER_UNIT;

    match side {
        Side::Buy => ProtectiveLevels {
            stop_loss: entry_price * (1.0 - sl),
            take_profit: entry_price * (1.0 + tp),
        },
        Side::Sell => ProtectiveLevels {
            stop_loss: entry_price * (1.0 + sl),
            take_profit: entry_price * (1.0 - tp),
        },
    }
}

/// Bid/ask spread relative to mid price, in pips
pub fn spread_pips(bid: f64, ask: f64) -> f64 {
    let mid = (ask + bid) / 2.0;
    if mid <= 0.0 {
        return f64::INFINITY;
    }
    (ask - bid) / mid * PIPS_PER_UNIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_from_risk() {
        // 1% of 10000 = 100 at risk, 2.0 stop distance => 50 units, cost 5000
        let size = calculate_position_size(10_000.0, 1.0, 100.0, 98.0);
        assert!((size - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_size_capped_by_balance() {
        // Tight stop would ask for 500 units (50000), only 100 affordable
        let size = calculate_position_size(10_000.0, 1.0, 100.0, 99.8);
        assert!(size * 100.0 <= 10_000.0);
        assert!((size - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_size_never_exceeds_balance() {
        let balances = [1.0, 333.33, 10_000.0, 98_765.4321];
        let entries = [0.0001, 0.37, 3.0, 101.7, 64_000.13];
        for &balance in &balances {
            for &entry in &entries {
                for stop_pips in [0.5, 30.0, 500.0] {
                    let stop = entry * (1.0 - stop_pips / PIPS_PER_UNIT);
                    let size = calculate_position_size(balance, 100.0, entry, stop);
                    assert!(size * entry <= balance, "{} * {} > {}", size, entry, balance);
                    assert!(size >= 0.0);
                }
            }
        }
    }

    #[test]
    fn test_degenerate_stop_gives_zero() {
        assert_eq!(calculate_position_size(10_000.0, 1.0, 100.0, 100.0), 0.0);
        assert_eq!(calculate_position_size(0.0, 1.0, 100.0, 99.0), 0.0);
        assert_eq!(calculate_position_size(10_000.0, 1.0, 0.0, 99.0), 0.0);
    }

    #[test]
    fn test_protective_levels_buy() {
        let levels = protective_levels(Side::Buy, 100.0, 30.0, 75.0);
        assert!((levels.stop_loss - 99.7).abs() < 1e-9);
        assert!((levels.take_profit - 100.75).abs() < 1e-9);
    }

    #[test]
    fn test_protective_levels_sell_mirrored() {
        let levels = protective_levels(Side::Sell, 100.0, 30.0, 75.0);
        assert!((levels.stop_loss - 100.3).abs() < 1e-9);
        assert!((levels.take_profit - 99.25).abs() < 1e-9);
    }

    #[test]
    fn test_spread_pips() {
        // 2 / 100 = 2% = 200 pips
        assert!((spread_pips(99.0, 101.0) - 200.0).abs() < 1e-9);
        assert_eq!(spread_pips(0.0, 0.0), f64::INFINITY);
    }
}
