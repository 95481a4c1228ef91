use crate::cache::CacheStore;
use crate::error::CacheError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Key namespace, so a shared Redis instance can hold other data.
const KEY_PREFIX: &str = "pulse:";

/// Redis-backed store.
///
/// `ConnectionManager` reconnects on its own and is a cheap clonable handle,
/// so each call clones it instead of holding a lock across awaits.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect, failing after five seconds rather than hanging startup.
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::Backend("Redis connection timeout after 5 seconds".to_string())
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn namespaced(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(Self::namespaced(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::namespaced(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::namespaced(key)).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(format!("{}*", KEY_PREFIX)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(KEY_PREFIX).map(|s| s.to_string()))
            .collect())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(format!("{}*", KEY_PREFIX)).await?;
        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        Ok(())
    }
}
