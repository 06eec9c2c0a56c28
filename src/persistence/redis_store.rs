use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use super::{sort_by_open_time, ConfigStore, TradeStore};
use crate::config::BotConfig;
use crate::error::BotError;
use crate::models::Trade;
use crate::Result;

const TRADES_KEY: &str = "crossbot:trades";
const ACTIVE_CONFIG_KEY: &str = "crossbot:config:active";

/// Redis-backed trade and config store
///
/// Trades live in one hash keyed by trade id, values are JSON.
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// # Example
    /// ```no_run
    /// # async fn connect() -> crossbot::Result<()> {
    /// let store = crossbot::persistence::RedisStore::new("redis://127.0.0.1:6379").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_namespace(redis_url, "").await
    }

    /// Connect with every key prefixed by `namespace`
    pub async fn with_namespace(redis_url: &str, namespace: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                BotError::Persistence("Redis connection timeout after 5 seconds".to_string())
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }

    fn key(&self, base: &str) -> String {
        if self.namespace.is_empty() {
            base.to_string()
        } else {
            format!("{}:{}", self.namespace, base)
        }
    }

    async fn load_all(&self) -> Result<Vec<Trade>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.hvals(self.key(TRADES_KEY)).await?;

        let mut trades = values
            .iter()
            .map(|json| serde_json::from_str::<Trade>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        sort_by_open_time(&mut trades);
        Ok(trades)
    }

    /// Remove every trade and the active config under this namespace
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&[self.key(TRADES_KEY), self.key(ACTIVE_CONFIG_KEY)])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for RedisStore {
    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(trade)?;
        let inserted: bool = conn
            .hset_nx(self.key(TRADES_KEY), trade.id.to_string(), value)
            .await?;
        if !inserted {
            return Err(BotError::Persistence(format!("trade {} already exists", trade.id)));
        }
        tracing::debug!(trade_id = %trade.id, symbol = %trade.symbol, "Trade stored");
        Ok(())
    }

    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(TRADES_KEY);
        let field = trade.id.to_string();

        let exists: bool = conn.hexists(&key, &field).await?;
        if !exists {
            return Err(BotError::Persistence(format!("trade {} not found", trade.id)));
        }
        let value = serde_json::to_string(trade)?;
        conn.hset::<_, _, _, ()>(&key, &field, value).await?;
        Ok(())
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(self.key(TRADES_KEY), id.to_string()).await?;
        value
            .map(|json| serde_json::from_str(&json).map_err(BotError::from))
            .transpose()
    }

    async fn open_trades(&self, symbol: &str) -> Result<Vec<Trade>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|t| t.symbol == symbol && t.status.is_open())
            .collect())
    }

    async fn all_trades(&self) -> Result<Vec<Trade>> {
        self.load_all().await
    }
}

#[async_trait]
impl ConfigStore for RedisStore {
    async fn active_config(&self) -> Result<Option<BotConfig>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(ACTIVE_CONFIG_KEY)).await?;
        value
            .map(|json| serde_json::from_str(&json).map_err(BotError::from))
            .transpose()
    }

    async fn set_active_config(&self, config: Option<BotConfig>) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(ACTIVE_CONFIG_KEY);
        match config {
            Some(config) => {
                let value = serde_json::to_string(&config)?;
                conn.set::<_, _, ()>(key, value).await?;
            }
            None => conn.del::<_, ()>(key).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, TradeStatus};

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_connection_timeout() {
        let result = RedisStore::new("redis://192.0.2.1:6379").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_trade_lifecycle() {
        let store = RedisStore::with_namespace("redis://127.0.0.1:6379", "test_lifecycle")
            .await
            .expect("Failed to connect to Redis");
        store.clear().await.unwrap();

        let mut trade = Trade::new(
            "o-1".to_string(),
            "BTC-USD".to_string(),
            Side::Buy,
            100.0,
            0.5,
        );
        store.insert_trade(&trade).await.unwrap();
        assert_eq!(store.open_trades("BTC-USD").await.unwrap().len(), 1);

        trade.close_at(105.0);
        store.update_trade(&trade).await.unwrap();

        let loaded = store.get_trade(trade.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TradeStatus::Closed);
        assert!(store.open_trades("BTC-USD").await.unwrap().is_empty());

        store.clear().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_active_config() {
        let store = RedisStore::with_namespace("redis://127.0.0.1:6379", "test_config")
            .await
            .expect("Failed to connect to Redis");
        store.clear().await.unwrap();

        assert!(store.active_config().await.unwrap().is_none());
        store
            .set_active_config(Some(BotConfig::default()))
            .await
            .unwrap();
        assert_eq!(
            store.active_config().await.unwrap(),
            Some(BotConfig::default())
        );

        store.set_active_config(None).await.unwrap();
        assert!(store.active_config().await.unwrap().is_none());
    }
}
