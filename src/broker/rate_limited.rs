use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use super::Broker;
use crate::models::{Account, Balance, Candle, Order, Side, Ticker, Timeframe};
use crate::Result;

type BrokerRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Wraps a broker so every call waits for a request permit
///
/// Cloneable; all clones share the same limiter.
#[derive(Clone)]
pub struct RateLimitedBroker<B> {
    inner: Arc<B>,
    rate_limiter: Arc<BrokerRateLimiter>,
}

impl<B: Broker> RateLimitedBroker<B> {
    pub fn new(inner: B, requests_per_second: u32) -> Self {
        Self::from_arc(Arc::new(inner), requests_per_second)
    }

    pub fn from_arc(inner: Arc<B>, requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rps);
        Self {
            inner,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn permit(&self) {
        self.rate_limiter.until_ready().await;
    }
}

#[async_trait]
impl<B: Broker> Broker for RateLimitedBroker<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        self.permit().await;
        self.inner.get_accounts().await
    }

    async fn get_balance(&self, currency: &str) -> Result<Balance> {
        self.permit().await;
        self.inner.get_balance(currency).await
    }

    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        self.permit().await;
        self.inner
            .get_klines(symbol, timeframe, start, end, limit)
            .await
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.permit().await;
        self.inner.get_ticker(symbol).await
    }

    async fn place_market_order(&self, symbol: &str, side: Side, size: f64) -> Result<Order> {
        self.permit().await;
        self.inner.place_market_order(symbol, side, size).await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<Order> {
        self.permit().await;
        self.inner.place_limit_order(symbol, side, size, price).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        self.permit().await;
        self.inner.cancel_order(symbol, order_id).await
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<Order> {
        self.permit().await;
        self.inner.get_order(symbol, order_id).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        self.permit().await;
        self.inner.get_open_orders(symbol).await
    }

    async fn place_stop_loss_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        stop_price: f64,
    ) -> Result<Order> {
        self.permit().await;
        self.inner
            .place_stop_loss_order(symbol, side, size, stop_price)
            .await
    }

    async fn place_take_profit_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<Order> {
        self.permit().await;
        self.inner
            .place_take_profit_order(symbol, side, size, price)
            .await
    }

    async fn is_symbol_supported(&self, symbol: &str) -> Result<bool> {
        self.permit().await;
        self.inner.is_symbol_supported(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;

    #[tokio::test]
    async fn test_delegates_to_inner_broker() {
        let paper = PaperBroker::new("BTC-USD", 10_000.0);
        paper.set_price(100.0);
        let broker = RateLimitedBroker::new(paper, 50);

        assert_eq!(broker.name(), "paper");
        let ticker = broker.get_ticker("BTC-USD").await.unwrap();
        assert_eq!(ticker.last().unwrap(), 100.0);
        assert!(broker.is_symbol_supported("BTC-USD").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_rate_falls_back_to_one_per_second() {
        let broker = RateLimitedBroker::new(PaperBroker::new("BTC-USD", 1.0), 0);
        assert!(broker.get_accounts().await.is_ok());
    }
}
