// Broker capability set consumed by the trading core
pub mod paper;
pub mod rate_limited;

use async_trait::async_trait;

use crate::models::{Account, Balance, Candle, Order, Side, Ticker, Timeframe};
use crate::Result;

pub use paper::{FailurePlan, PaperBroker};
pub use rate_limited::RateLimitedBroker;

/// Exchange operations the core depends on
///
/// Implementations translate their SDK's quirks (field names, error codes,
/// status strings) into these types. Amounts are decimal strings and
/// failures are reported as [`crate::BotError::Broker`] with a readable
/// message.
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &str;

    async fn get_accounts(&self) -> Result<Vec<Account>>;

    async fn get_balance(&self, currency: &str) -> Result<Balance>;

    /// Candles ascending by time, optionally bounded by `start`/`end`
    /// (unix seconds, inclusive) and truncated to the last `limit`
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>>;

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn place_market_order(&self, symbol: &str, side: Side, size: f64) -> Result<Order>;

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<Order>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<Order>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<Order>>;

    async fn place_stop_loss_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        stop_price: f64,
    ) -> Result<Order>;

    async fn place_take_profit_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<Order>;

    async fn is_symbol_supported(&self, symbol: &str) -> Result<bool>;
}
