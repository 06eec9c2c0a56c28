mod redis_store;

pub use redis_store::RedisStore;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::BotConfig;
use crate::error::BotError;
use crate::models::Trade;
use crate::Result;

/// Durable home of live trade records
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn insert_trade(&self, trade: &Trade) -> Result<()>;

    /// Replace a stored trade; fails if the id is unknown
    async fn update_trade(&self, trade: &Trade) -> Result<()>;

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>>;

    /// Non-terminal trades for `symbol`, oldest first
    async fn open_trades(&self, symbol: &str) -> Result<Vec<Trade>>;

    async fn all_trades(&self) -> Result<Vec<Trade>>;
}

/// Holder of the single active trading configuration
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn active_config(&self) -> Result<Option<BotConfig>>;

    /// `None` deactivates trading
    async fn set_active_config(&self, config: Option<BotConfig>) -> Result<()>;
}

fn sort_by_open_time(trades: &mut [Trade]) {
    trades.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
}

/// In-process store, used for tests and when Redis is unreachable
#[derive(Default)]
pub struct MemoryStore {
    trades: RwLock<Vec<Trade>>,
    config: RwLock<Option<BotConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BotConfig) -> Self {
        Self {
            trades: RwLock::new(Vec::new()),
            config: RwLock::new(Some(config)),
        }
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.write().await;
        if trades.iter().any(|t| t.id == trade.id) {
            return Err(BotError::Persistence(format!("trade {} already exists", trade.id)));
        }
        trades.push(trade.clone());
        Ok(())
    }

    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        let mut trades = self.trades.write().await;
        let slot = trades
            .iter_mut()
            .find(|t| t.id == trade.id)
            .ok_or_else(|| BotError::Persistence(format!("trade {} not found", trade.id)))?;
        *slot = trade.clone();
        Ok(())
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>> {
        Ok(self.trades.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn open_trades(&self, symbol: &str) -> Result<Vec<Trade>> {
        let mut open: Vec<Trade> = self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| t.symbol == symbol && t.status.is_open())
            .cloned()
            .collect();
        sort_by_open_time(&mut open);
        Ok(open)
    }

    async fn all_trades(&self) -> Result<Vec<Trade>> {
        Ok(self.trades.read().await.clone())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn active_config(&self) -> Result<Option<BotConfig>> {
        Ok(self.config.read().await.clone())
    }

    async fn set_active_config(&self, config: Option<BotConfig>) -> Result<()> {
        *self.config.write().await = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, TradeStatus};

    fn trade(symbol: &str) -> Trade {
        Trade::new("o-1".to_string(), symbol.to_string(), Side::Buy, 100.0, 1.0)
    }

    #[tokio::test]
    async fn test_open_trades_excludes_terminal() {
        let store = MemoryStore::new();
        let open = trade("BTC-USD");
        let mut closed = trade("BTC-USD");
        closed.close_at(110.0);
        let other = trade("ETH-USD");

        store.insert_trade(&open).await.unwrap();
        store.insert_trade(&closed).await.unwrap();
        store.insert_trade(&other).await.unwrap();

        let found = store.open_trades("BTC-USD").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, open.id);
        assert_eq!(store.all_trades().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_status_still_blocks_entry() {
        let store = MemoryStore::new();
        let mut t = trade("BTC-USD");
        t.status = TradeStatus::Unknown;
        store.insert_trade(&t).await.unwrap();

        assert_eq!(store.open_trades("BTC-USD").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing_trade() {
        let store = MemoryStore::new();
        let mut t = trade("BTC-USD");
        assert!(matches!(
            store.update_trade(&t).await,
            Err(BotError::Persistence(_))
        ));

        store.insert_trade(&t).await.unwrap();
        t.status = TradeStatus::Filled;
        store.update_trade(&t).await.unwrap();
        let loaded = store.get_trade(t.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TradeStatus::Filled);
    }

    #[tokio::test]
    async fn test_active_config_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.active_config().await.unwrap().is_none());

        store
            .set_active_config(Some(BotConfig::default()))
            .await
            .unwrap();
        assert_eq!(
            store.active_config().await.unwrap(),
            Some(BotConfig::default())
        );
    }
}
