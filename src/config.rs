use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BotError;
use crate::models::Timeframe;
use crate::strategy::{SignalConfig, StrategyKind};
use crate::Result;

/// Active trading configuration for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub fast_period: usize,
    pub slow_period: usize,
    pub risk_percent: f64,
    pub stop_loss_pips: f64,
    pub take_profit_pips: f64,
    pub max_spread_pips: f64,
    pub allow_buy: bool,
    pub allow_sell: bool,
    pub strategy: StrategyKind,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    /// Candles requested from the broker per tick
    pub candle_limit: usize,
    /// Close an open trade when the opposite crossover appears
    pub close_on_reversal: bool,
    /// Overrides the quote currency parsed from `symbol`
    pub quote_currency: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::FiveMinutes,
            fast_period: 9,
            slow_period: 21,
            risk_percent: 1.5,
            stop_loss_pips: 30.0,
            take_profit_pips: 75.0,
            max_spread_pips: 20.0,
            allow_buy: true,
            allow_sell: false,
            strategy: StrategyKind::EmaOnly,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            candle_limit: 100,
            close_on_reversal: true,
            quote_currency: None,
        }
    }
}

impl BotConfig {
    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            fast_period: self.fast_period,
            slow_period: self.slow_period,
            strategy: self.strategy,
            rsi_period: self.rsi_period,
            rsi_overbought: self.rsi_overbought,
            rsi_oversold: self.rsi_oversold,
            allow_buy: self.allow_buy,
            allow_sell: self.allow_sell,
        }
    }

    /// Quote currency, e.g. `USD` for `BTC-USD` or `USDT` for `ETH/USDT`
    pub fn quote_currency(&self) -> String {
        if let Some(quote) = &self.quote_currency {
            return quote.clone();
        }
        self.symbol
            .rsplit(|c: char| matches!(c, '-' | '/' | '_'))
            .next()
            .unwrap_or(&self.symbol)
            .to_string()
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(BotError::Config("symbol must not be empty".to_string()));
        }
        if !(self.risk_percent > 0.0 && self.risk_percent <= 100.0) {
            return Err(BotError::Config(format!(
                "risk_percent must be in (0, 100], got {}",
                self.risk_percent
            )));
        }
        if self.stop_loss_pips <= 0.0 || self.take_profit_pips <= 0.0 {
            return Err(BotError::Config(
                "stop_loss_pips and take_profit_pips must be positive".to_string(),
            ));
        }
        if self.candle_limit < self.slow_period + 2 {
            return Err(BotError::Config(format!(
                "candle_limit ({}) must be at least slow_period + 2 ({})",
                self.candle_limit,
                self.slow_period + 2
            )));
        }
        self.signal_config().validate()
    }
}

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub redis_url: String,
    pub log_filter: String,
    pub fill_poll_delay_ms: u64,
    pub balance_release_delay_ms: u64,
    pub broker_requests_per_second: u32,
    /// Starting quote balance for the paper broker
    pub paper_balance: f64,
    pub trading: BotConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            log_filter: "crossbot=info".to_string(),
            fill_poll_delay_ms: 500,
            balance_release_delay_ms: 1_000,
            broker_requests_per_second: 10,
            paper_balance: 10_000.0,
            trading: BotConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `.env`, an optional `crossbot.toml` and `CROSSBOT_*` variables
    ///
    /// Nested keys use a double underscore, e.g. `CROSSBOT_TRADING__SYMBOL=ETH-USD`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(Some("crossbot"))
    }

    pub fn load_from(file: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(name) = file {
            builder = builder.add_source(File::with_name(name).required(false));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("CROSSBOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.trading.validate()?;
        Ok(settings)
    }

    pub fn fill_poll_delay(&self) -> Duration {
        Duration::from_millis(self.fill_poll_delay_ms)
    }

    pub fn balance_release_delay(&self) -> Duration {
        Duration::from_millis(self.balance_release_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BotConfig::default().validate().is_ok());
    }

    #[test]
    fn test_quote_currency() {
        let mut config = BotConfig::default();
        assert_eq!(config.quote_currency(), "USD");

        config.symbol = "ETH/USDT".to_string();
        assert_eq!(config.quote_currency(), "USDT");

        config.quote_currency = Some("EUR".to_string());
        assert_eq!(config.quote_currency(), "EUR");
    }

    #[test]
    fn test_validate_rejects_bad_risk() {
        let config = BotConfig {
            risk_percent: 0.0,
            ..BotConfig::default()
        };
        assert!(matches!(config.validate(), Err(BotError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unsupported_strategy() {
        let config = BotConfig {
            strategy: StrategyKind::MeanReversion,
            ..BotConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BotError::UnsupportedStrategy(_))
        ));
    }

    #[test]
    fn test_bot_config_deserializes_with_defaults() {
        let json = r#"{"symbol":"ETH-USD","timeframe":"1h","strategy":"ema-rsi"}"#;
        let config: BotConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.symbol, "ETH-USD");
        assert_eq!(config.timeframe, Timeframe::OneHour);
        assert_eq!(config.strategy, StrategyKind::EmaRsi);
        assert_eq!(config.slow_period, 21);
    }

    #[test]
    fn test_settings_defaults_without_sources() {
        let settings = Settings::load_from(None).unwrap();
        assert_eq!(settings.fill_poll_delay(), Duration::from_millis(500));
        assert_eq!(settings.trading.symbol, "BTC-USD");
    }
}
