use crate::models::{Candle, Timeframe};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default first candle time: 2023-11-14 22:13:20 UTC
pub const DEFAULT_START_TIME: i64 = 1_700_000_000;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise
    Uptrend,
    /// Steady downtrend with noise
    Downtrend,
    /// Mean-reverting chop around the base price
    Sideways,
    /// Large random swings
    Volatile,
    /// Missing candles every 50 intervals
    WithGaps,
    /// Slow growth, then a 25% slide over the second half
    Drawdown,
}

impl MarketScenario {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uptrend => "uptrend",
            Self::Downtrend => "downtrend",
            Self::Sideways => "sideways",
            Self::Volatile => "volatile",
            Self::WithGaps => "with-gaps",
            Self::Drawdown => "drawdown",
        }
    }

    pub fn all() -> [MarketScenario; 5] {
        [
            Self::Uptrend,
            Self::Downtrend,
            Self::Sideways,
            Self::Volatile,
            Self::Drawdown,
        ]
    }
}

impl std::str::FromStr for MarketScenario {
    type Err = crate::error::BotError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "uptrend" => Ok(Self::Uptrend),
            "downtrend" => Ok(Self::Downtrend),
            "sideways" => Ok(Self::Sideways),
            "volatile" => Ok(Self::Volatile),
            "with-gaps" => Ok(Self::WithGaps),
            "drawdown" => Ok(Self::Drawdown),
            other => Err(crate::error::BotError::Config(format!(
                "unknown scenario '{}'",
                other
            ))),
        }
    }
}

/// Generates reproducible synthetic price data for backtesting
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
    start_time: i64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 150.0,
            base_volume: 1_000_000.0,
            start_time: DEFAULT_START_TIME,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate `num_candles` candles spaced by `timeframe`
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_candles: usize,
        timeframe: Timeframe,
    ) -> Vec<Candle> {
        let interval = timeframe.seconds();
        let intervals_per_day = 86_400.0 / interval as f64;
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;
        let mut slot: i64 = 0;

        for i in 0..num_candles {
            price = match scenario {
                // +/-2% per day plus 0.1% noise so the trend dominates
                MarketScenario::Uptrend => {
                    price * (1.0 + 0.02 / intervals_per_day + self.rng.gen_range(-0.001..0.001))
                }
                MarketScenario::Downtrend => {
                    price * (1.0 - 0.02 / intervals_per_day + self.rng.gen_range(-0.001..0.001))
                }
                MarketScenario::Sideways => {
                    let reversion = (self.base_price - price) * 0.1;
                    price + reversion + price * self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => {
                    (price * (1.0 + self.rng.gen_range(-0.05..0.05))).max(self.base_price * 0.5)
                }
                MarketScenario::WithGaps => {
                    if i % 50 == 49 {
                        slot += 2;
                        continue;
                    }
                    price * (1.0 + self.rng.gen_range(-0.01..0.01))
                }
                MarketScenario::Drawdown => {
                    if i < num_candles / 2 {
                        price * (1.0 + self.rng.gen_range(-0.005..0.01))
                    } else {
                        let drop_rate = -0.25 / (num_candles as f64 / 2.0);
                        price * (1.0 + drop_rate + self.rng.gen_range(-0.005..0.005))
                    }
                }
            };

            let time = self.start_time + slot * interval;
            candles.push(self.create_candle(price, time));
            slot += 1;
        }

        candles
    }

    /// OHLC around a close price with +/-0.2% intrabar movement
    fn create_candle(&mut self, price: f64, time: i64) -> Candle {
        let noise_pct = 0.002;

        let high = price * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = price * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let open = (price * (1.0 + self.rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle {
            time,
            open,
            high,
            low,
            close: price,
            volume,
        }
    }
}

/// Candles whose closes move linearly from `start_price` to `end_price`
///
/// Each candle opens at the previous close, so high/low are the two
/// endpoints of the step.
pub fn linear_candles(
    start_price: f64,
    end_price: f64,
    count: usize,
    start_time: i64,
    interval_secs: i64,
) -> Vec<Candle> {
    let step = if count > 1 {
        (end_price - start_price) / (count - 1) as f64
    } else {
        0.0
    };

    let mut previous = start_price;
    (0..count)
        .map(|i| {
            let close = start_price + step * i as f64;
            let open = previous;
            previous = close;
            Candle {
                time: start_time + i as i64 * interval_secs,
                open,
                high: open.max(close),
                low: open.min(close),
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uptrend() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Uptrend, 500, Timeframe::FiveMinutes);

        assert_eq!(candles.len(), 500);

        let first_price = candles.first().unwrap().close;
        let last_price = candles.last().unwrap().close;
        assert!(
            last_price > first_price,
            "Uptrend should end higher: {} -> {}",
            first_price,
            last_price
        );
    }

    #[test]
    fn test_generate_downtrend() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Downtrend, 500, Timeframe::FiveMinutes);

        let first_price = candles.first().unwrap().close;
        let last_price = candles.last().unwrap().close;
        assert!(
            last_price < first_price,
            "Downtrend should end lower: {} -> {}",
            first_price,
            last_price
        );
    }

    #[test]
    fn test_generate_sideways() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Sideways, 500, Timeframe::FiveMinutes);

        let base = gen.base_price();
        for candle in &candles {
            assert!(
                candle.close > base * 0.9 && candle.close < base * 1.1,
                "Sideways should stay near base: {} vs {}",
                candle.close,
                base
            );
        }
    }

    #[test]
    fn test_same_seed_same_candles() {
        let a = SyntheticDataGenerator::new(7).generate(MarketScenario::Volatile, 200, Timeframe::OneHour);
        let b = SyntheticDataGenerator::new(7).generate(MarketScenario::Volatile, 200, Timeframe::OneHour);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_with_gaps() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::WithGaps, 100, Timeframe::FiveMinutes);

        assert!(candles.len() < 100);
        let has_gap = candles.windows(2).any(|w| w[1].time - w[0].time > 300);
        assert!(has_gap, "Should contain time gaps");
    }

    #[test]
    fn test_timestamps_follow_timeframe() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Uptrend, 100, Timeframe::FifteenMinutes);

        assert_eq!(candles[0].time, DEFAULT_START_TIME);
        assert!(candles.windows(2).all(|w| w[1].time - w[0].time == 900));
    }

    #[test]
    fn test_ohlc_consistency() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Drawdown, 100, Timeframe::FiveMinutes);

        for candle in &candles {
            assert!(candle.high >= candle.close, "High should be >= close");
            assert!(candle.high >= candle.open, "High should be >= open");
            assert!(candle.low <= candle.close, "Low should be <= close");
            assert!(candle.low <= candle.open, "Low should be <= open");
        }
    }

    #[test]
    fn test_linear_candles() {
        let candles = linear_candles(100.0, 200.0, 101, 0, 60);

        assert_eq!(candles.len(), 101);
        assert_eq!(candles[0].close, 100.0);
        assert!((candles[100].close - 200.0).abs() < 1e-9);
        assert_eq!(candles[1].open, candles[0].close);
        assert_eq!(candles[1].low, candles[0].close);
        assert_eq!(candles[100].time, 6_000);
    }
}
