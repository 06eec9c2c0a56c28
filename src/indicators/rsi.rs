use crate::models::Candle;

/// Value used where RSI is undefined
pub const RSI_NEUTRAL: f64 = 50.0;

/// Calculate the Relative Strength Index (RSI) series over candle closes
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// The series has one entry per candle, filled with [`RSI_NEUTRAL`] where
/// undefined. Averages are seeded over the first `period` price changes
/// and then follow Wilder smoothing. The value derived from the change
/// ending at candle `i` is stored at index `i`.
pub fn calculate_rsi(candles: &[Candle], period: usize) -> Vec<f64> {
    let mut series = vec![RSI_NEUTRAL; candles.len()];
    if period == 0 || candles.len() < period + 1 {
        return series;
    }

    let deltas: Vec<f64> = candles.windows(2).map(|w| w[1].close - w[0].close).collect();

    let mut avg_gain = deltas[..period].iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = deltas[..period].iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;
    series[period] = rsi_value(avg_gain, avg_loss);

    let smoothing = (period - 1) as f64;
    for (j, delta) in deltas.iter().enumerate().skip(period) {
        avg_gain = (avg_gain * smoothing + delta.max(0.0)) / period as f64;
        avg_loss = (avg_loss * smoothing + (-delta).max(0.0)) / period as f64;
        series[j + 1] = rsi_value(avg_gain, avg_loss);
    }

    series
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}
