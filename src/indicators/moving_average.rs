use crate::models::Candle;

/// Calculate Simple Moving Average (SMA) of the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate the Exponential Moving Average (EMA) series over candle closes
///
/// The result has one entry per candle. The first `period - 1` entries are
/// warm-up placeholders (0.0); entry `period - 1` is the SMA of the first
/// `period` closes. Returns an empty series when there are fewer than
/// `period` candles.
pub fn calculate_ema(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut series = vec![0.0; closes.len()];
    let mut ema = match calculate_sma(&closes[..period], period) {
        Some(seed) => seed,
        None => return Vec::new(),
    };
    series[period - 1] = ema;

    for (i, close) in closes.iter().enumerate().skip(period) {
        ema = (close - ema) * multiplier + ema;
        series[i] = ema;
    }

    series
}
