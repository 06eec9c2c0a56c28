use serde::{Deserialize, Serialize};

use super::StrategyKind;
use crate::error::BotError;
use crate::indicators::{calculate_ema, calculate_rsi};
use crate::models::{Candle, Side, Signal, SignalKind};
use crate::Result;

/// Configuration for signal generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub fast_period: usize,
    pub slow_period: usize,
    pub strategy: StrategyKind,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub allow_buy: bool,
    pub allow_sell: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
            strategy: StrategyKind::EmaOnly,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            allow_buy: true,
            allow_sell: true,
        }
    }
}

impl SignalConfig {
    /// Minimum candles for a meaningful crossover check
    pub fn min_candles_required(&self) -> usize {
        self.slow_period + 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.fast_period == 0 || self.slow_period == 0 {
            return Err(BotError::Config("EMA periods must be positive".to_string()));
        }
        if self.fast_period >= self.slow_period {
            return Err(BotError::Config(format!(
                "fast period ({}) must be shorter than slow period ({})",
                self.fast_period, self.slow_period
            )));
        }
        if self.strategy.uses_rsi() && self.rsi_period == 0 {
            return Err(BotError::Config("RSI period must be positive".to_string()));
        }
        if !self.strategy.is_supported() {
            return Err(BotError::UnsupportedStrategy(self.strategy.to_string()));
        }
        Ok(())
    }
}

/// Indicator series computed once per candle window
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    pub fast: Vec<f64>,
    pub slow: Vec<f64>,
    pub rsi: Option<Vec<f64>>,
}

impl IndicatorSet {
    pub fn compute(candles: &[Candle], config: &SignalConfig) -> Result<Self> {
        let needed = config.min_candles_required();
        if candles.len() < needed {
            return Err(BotError::InsufficientData {
                needed,
                got: candles.len(),
            });
        }

        let rsi = config
            .strategy
            .uses_rsi()
            .then(|| calculate_rsi(candles, config.rsi_period));

        Ok(Self {
            fast: calculate_ema(candles, config.fast_period),
            slow: calculate_ema(candles, config.slow_period),
            rsi,
        })
    }

    pub fn len(&self) -> usize {
        self.slow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slow.is_empty()
    }
}

/// Crossover between `index - 1` and `index`, if any
///
/// Up (fast moves above slow) maps to [`Side::Buy`], down to [`Side::Sell`].
pub fn detect_crossover(
    prev_fast: f64,
    prev_slow: f64,
    curr_fast: f64,
    curr_slow: f64,
) -> Option<Side> {
    if prev_fast <= prev_slow && curr_fast > curr_slow {
        Some(Side::Buy)
    } else if prev_fast >= prev_slow && curr_fast < curr_slow {
        Some(Side::Sell)
    } else {
        None
    }
}

/// EMA crossover signal engine with strategy filters and direction gates
#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: SignalConfig,
    signals_filtered: u64,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            signals_filtered: 0,
        })
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Crossover candidates rejected by a filter or a direction gate
    pub fn signals_filtered(&self) -> u64 {
        self.signals_filtered
    }

    /// Raw crossover at `index`, ignoring filters and direction gates
    pub fn crossover_at(&self, indicators: &IndicatorSet, index: usize) -> Option<Side> {
        if index == 0 || index >= indicators.len() || index >= indicators.fast.len() {
            return None;
        }

        detect_crossover(
            indicators.fast[index - 1],
            indicators.slow[index - 1],
            indicators.fast[index],
            indicators.slow[index],
        )
    }

    /// Evaluate the signal at `index` with `price` as the reference price
    pub fn evaluate(&mut self, indicators: &IndicatorSet, index: usize, price: f64) -> Signal {
        let fast_value = indicators.fast.get(index).copied().unwrap_or(0.0);
        let slow_value = indicators.slow.get(index).copied().unwrap_or(0.0);
        let signal = |kind| Signal {
            kind,
            fast_value,
            slow_value,
            price,
        };

        let side = match self.crossover_at(indicators, index) {
            Some(side) => side,
            None => return signal(SignalKind::None),
        };

        let enabled = match side {
            Side::Buy => self.config.allow_buy,
            Side::Sell => self.config.allow_sell,
        };
        if !enabled {
            self.signals_filtered += 1;
            tracing::debug!(%side, index, "Crossover ignored: direction disabled");
            return signal(SignalKind::None);
        }

        let (prev_rsi, rsi) = match &indicators.rsi {
            Some(series) => (series[index - 1], series[index]),
            None => (crate::indicators::RSI_NEUTRAL, crate::indicators::RSI_NEUTRAL),
        };

        if !self.config.strategy.accepts(side, prev_rsi, rsi, &self.config) {
            self.signals_filtered += 1;
            tracing::debug!(
                %side,
                index,
                strategy = %self.config.strategy,
                rsi,
                prev_rsi,
                "Crossover rejected by strategy filter"
            );
            return signal(SignalKind::None);
        }

        match side {
            Side::Buy => signal(SignalKind::Buy),
            Side::Sell => signal(SignalKind::Sell),
        }
    }

    /// Compute indicators over `candles` and evaluate the latest candle
    pub fn evaluate_latest(&mut self, candles: &[Candle]) -> Result<Signal> {
        let indicators = IndicatorSet::compute(candles, &self.config)?;
        let index = candles.len() - 1;
        Ok(self.evaluate(&indicators, index, candles[index].close))
    }
}

/// Validate that candles are uniformly spaced in time
///
/// # Arguments
/// * `candles` - The candles to validate
/// * `expected_interval_secs` - Expected time between candles in seconds
///
/// # Tolerance
/// Allows up to 1.5x the expected interval
pub fn validate_candle_uniformity(candles: &[Candle], expected_interval_secs: i64) -> Result<()> {
    if candles.len() < 2 {
        return Ok(());
    }

    let max_gap_secs = expected_interval_secs + (expected_interval_secs / 2);

    for window in candles.windows(2) {
        let time_diff = window[1].time - window[0].time;

        if time_diff <= 0 {
            return Err(BotError::InvalidData("Candles are not sorted by time".to_string()));
        }

        if time_diff > max_gap_secs {
            return Err(BotError::InvalidData(format!(
                "Data gap detected: {}s between candles (expected ~{}s) at {}",
                time_diff,
                expected_interval_secs,
                window[0].datetime().format("%Y-%m-%d %H:%M:%S")
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators(fast: Vec<f64>, slow: Vec<f64>, rsi: Option<Vec<f64>>) -> IndicatorSet {
        IndicatorSet { fast, slow, rsi }
    }

    fn engine(config: SignalConfig) -> SignalEngine {
        SignalEngine::new(config).unwrap()
    }

    #[test]
    fn test_detect_crossover() {
        assert_eq!(detect_crossover(9.0, 10.0, 11.0, 10.0), Some(Side::Buy));
        assert_eq!(detect_crossover(10.0, 10.0, 11.0, 10.0), Some(Side::Buy));
        assert_eq!(detect_crossover(11.0, 10.0, 9.0, 10.0), Some(Side::Sell));
        assert_eq!(detect_crossover(11.0, 10.0, 12.0, 10.0), None);
        assert_eq!(detect_crossover(10.0, 10.0, 10.0, 10.0), None);
    }

    #[test]
    fn test_ema_only_passes_crossover() {
        let mut engine = engine(SignalConfig::default());
        let ind = indicators(vec![9.0, 11.0], vec![10.0, 10.0], None);

        let signal = engine.evaluate(&ind, 1, 100.0);
        assert_eq!(signal.kind, SignalKind::Buy);
        assert_eq!(signal.fast_value, 11.0);
        assert_eq!(signal.slow_value, 10.0);
        assert_eq!(signal.price, 100.0);
        assert_eq!(engine.signals_filtered(), 0);
    }

    #[test]
    fn test_no_crossover_is_none() {
        let mut engine = engine(SignalConfig::default());
        let ind = indicators(vec![11.0, 12.0], vec![10.0, 10.0], None);

        assert_eq!(engine.evaluate(&ind, 1, 100.0).kind, SignalKind::None);
        assert_eq!(engine.signals_filtered(), 0);
    }

    #[test]
    fn test_disabled_direction_counts_as_filtered() {
        let mut engine = engine(SignalConfig {
            allow_sell: false,
            ..SignalConfig::default()
        });
        let ind = indicators(vec![11.0, 9.0], vec![10.0, 10.0], None);

        assert_eq!(engine.evaluate(&ind, 1, 100.0).kind, SignalKind::None);
        assert_eq!(engine.signals_filtered(), 1);
    }

    #[test]
    fn test_rsi_filter_rejects_overbought_buy() {
        let mut engine = engine(SignalConfig {
            strategy: StrategyKind::EmaRsi,
            ..SignalConfig::default()
        });
        let ind = indicators(vec![9.0, 11.0], vec![10.0, 10.0], Some(vec![72.0, 75.0]));

        assert_eq!(engine.evaluate(&ind, 1, 100.0).kind, SignalKind::None);
        assert_eq!(engine.signals_filtered(), 1);
    }

    #[test]
    fn test_trend_filter_accepts_rising_rsi() {
        let mut engine = engine(SignalConfig {
            strategy: StrategyKind::EmaRsiTrend,
            ..SignalConfig::default()
        });
        let ind = indicators(vec![9.0, 11.0], vec![10.0, 10.0], Some(vec![55.0, 60.0]));

        assert_eq!(engine.evaluate(&ind, 1, 100.0).kind, SignalKind::Buy);
    }

    #[test]
    fn test_unsupported_strategy_fails_fast() {
        for strategy in [
            StrategyKind::MeanReversion,
            StrategyKind::Momentum,
            StrategyKind::MultiTimeframeTrend,
        ] {
            let result = SignalEngine::new(SignalConfig {
                strategy,
                ..SignalConfig::default()
            });
            assert!(matches!(result, Err(BotError::UnsupportedStrategy(_))));
        }
    }

    #[test]
    fn test_invalid_periods_rejected() {
        let result = SignalEngine::new(SignalConfig {
            fast_period: 21,
            slow_period: 9,
            ..SignalConfig::default()
        });
        assert!(matches!(result, Err(BotError::Config(_))));
    }

    #[test]
    fn test_indicator_set_requires_slow_plus_two() {
        let config = SignalConfig::default();
        let candles: Vec<Candle> = (0..22)
            .map(|i| Candle {
                time: i * 60,
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect();

        let result = IndicatorSet::compute(&candles, &config);
        assert!(matches!(
            result,
            Err(BotError::InsufficientData { needed: 23, got: 22 })
        ));
    }

    #[test]
    fn test_candle_uniformity() {
        let mut candles: Vec<Candle> = (0..5)
            .map(|i| Candle {
                time: i * 300,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            })
            .collect();
        assert!(validate_candle_uniformity(&candles, 300).is_ok());

        candles[4].time += 900;
        assert!(matches!(
            validate_candle_uniformity(&candles, 300),
            Err(BotError::InvalidData(_))
        ));

        candles.swap(1, 2);
        assert!(matches!(
            validate_candle_uniformity(&candles, 300),
            Err(BotError::InvalidData(_))
        ));
    }
}
