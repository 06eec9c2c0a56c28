// Trading strategy module
pub mod signals;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BotError;
use crate::models::Side;
use crate::Result;

pub use signals::{
    detect_crossover, validate_candle_uniformity, IndicatorSet, SignalConfig, SignalEngine,
};

/// Strategy variants that gate a crossover candidate
///
/// The last three are accepted in configuration but have no evaluation
/// rule; building a [`SignalEngine`] for them fails with
/// [`BotError::UnsupportedStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    EmaOnly,
    EmaRsi,
    EmaRsiTrend,
    MeanReversion,
    Momentum,
    MultiTimeframeTrend,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmaOnly => "ema-only",
            Self::EmaRsi => "ema-rsi",
            Self::EmaRsiTrend => "ema-rsi-trend",
            Self::MeanReversion => "mean-reversion",
            Self::Momentum => "momentum",
            Self::MultiTimeframeTrend => "multi-timeframe-trend",
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::EmaOnly | Self::EmaRsi | Self::EmaRsiTrend)
    }

    pub fn uses_rsi(&self) -> bool {
        matches!(self, Self::EmaRsi | Self::EmaRsiTrend)
    }

    /// Whether a crossover candidate towards `side` passes this strategy's filter
    pub fn accepts(&self, side: Side, prev_rsi: f64, rsi: f64, config: &SignalConfig) -> bool {
        match self {
            Self::EmaOnly => true,
            Self::EmaRsi => rsi_confirms(side, rsi, config),
            Self::EmaRsiTrend => {
                rsi_confirms(side, rsi, config) && momentum_confirms(side, prev_rsi, rsi)
            }
            Self::MeanReversion | Self::Momentum | Self::MultiTimeframeTrend => false,
        }
    }
}

fn rsi_confirms(side: Side, rsi: f64, config: &SignalConfig) -> bool {
    match side {
        Side::Buy => rsi < config.rsi_overbought,
        Side::Sell => rsi > config.rsi_oversold,
    }
}

fn momentum_confirms(side: Side, prev_rsi: f64, rsi: f64) -> bool {
    match side {
        Side::Buy => rsi > prev_rsi || rsi < 50.0,
        Side::Sell => rsi < prev_rsi || rsi > 50.0,
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ema-only" => Ok(Self::EmaOnly),
            "ema-rsi" => Ok(Self::EmaRsi),
            "ema-rsi-trend" => Ok(Self::EmaRsiTrend),
            "mean-reversion" => Ok(Self::MeanReversion),
            "momentum" => Ok(Self::Momentum),
            "multi-timeframe-trend" => Ok(Self::MultiTimeframeTrend),
            other => Err(BotError::Config(format!("unknown strategy '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip_names() {
        for name in ["ema-only", "ema-rsi", "ema-rsi-trend", "momentum"] {
            let kind: StrategyKind = name.parse().unwrap();
            assert_eq!(kind.as_str(), name);
        }
        assert!("rsi-only".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&StrategyKind::EmaRsiTrend).unwrap();
        assert_eq!(json, "\"ema-rsi-trend\"");
    }

    #[test]
    fn test_rsi_filter() {
        let config = SignalConfig::default();
        assert!(StrategyKind::EmaRsi.accepts(Side::Buy, 50.0, 65.0, &config));
        assert!(!StrategyKind::EmaRsi.accepts(Side::Buy, 50.0, 75.0, &config));
        assert!(StrategyKind::EmaRsi.accepts(Side::Sell, 50.0, 35.0, &config));
        assert!(!StrategyKind::EmaRsi.accepts(Side::Sell, 50.0, 25.0, &config));
    }

    #[test]
    fn test_trend_filter_requires_momentum() {
        let config = SignalConfig::default();
        // Buy: RSI rising, or below 50
        assert!(StrategyKind::EmaRsiTrend.accepts(Side::Buy, 55.0, 60.0, &config));
        assert!(StrategyKind::EmaRsiTrend.accepts(Side::Buy, 48.0, 45.0, &config));
        assert!(!StrategyKind::EmaRsiTrend.accepts(Side::Buy, 62.0, 60.0, &config));
        // Sell: RSI falling, or above 50
        assert!(StrategyKind::EmaRsiTrend.accepts(Side::Sell, 45.0, 40.0, &config));
        assert!(StrategyKind::EmaRsiTrend.accepts(Side::Sell, 52.0, 55.0, &config));
        assert!(!StrategyKind::EmaRsiTrend.accepts(Side::Sell, 38.0, 40.0, &config));
    }
}
