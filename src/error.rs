use thiserror::Error;

/// Errors surfaced by the trading core
#[derive(Debug, Error)]
pub enum BotError {
    /// Not enough candles for the requested indicator periods
    #[error("Insufficient data: need {needed} candles, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Degenerate stop distance or zero computed size
    #[error("Invalid sizing: {0}")]
    InvalidSizing(String),

    /// Network/API failure reported by the broker collaborator
    #[error("Broker error: {0}")]
    Broker(String),

    /// Stop-loss or take-profit order could not be placed
    #[error("Protection failure: {0}")]
    ProtectionFailure(String),

    /// Candle history with gaps or out-of-order timestamps
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unsupported strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl BotError {
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }
}

impl From<redis::RedisError> for BotError {
    fn from(err: redis::RedisError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<::config::ConfigError> for BotError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<rust_decimal::Error> for BotError {
    fn from(err: rust_decimal::Error) -> Self {
        Self::Broker(format!("invalid decimal amount: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = BotError::InsufficientData { needed: 23, got: 10 };
        assert_eq!(err.to_string(), "Insufficient data: need 23 candles, got 10");
    }

    #[test]
    fn test_decimal_error_maps_to_broker() {
        let err: BotError = "abc".parse::<rust_decimal::Decimal>().unwrap_err().into();
        assert!(matches!(err, BotError::Broker(_)));
    }
}
