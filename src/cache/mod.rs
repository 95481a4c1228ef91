pub mod incremental;
pub mod memory;
pub mod redis;

pub use incremental::CachedAnalytics;
pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::error::CacheError;
use crate::models::CacheEntry;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Raw string storage behind the analytics cache.
///
/// Implementations are shared as `Arc<dyn CacheStore>`. A write that hits a
/// storage quota reports `CacheError::QuotaExceeded` so the caller can prune
/// and retry instead of losing the refresh.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Canonical cache key for an operation over a symbol set.
///
/// Symbols are sorted before joining, so the same watchlist in any order
/// maps to one key. Params distinguish variants of the same operation.
pub fn cache_key(operation: &str, symbols: &[String], params: &[String]) -> String {
    let mut sorted: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
    sorted.sort_unstable();

    let mut sections = vec![operation.to_string(), sorted.join("-")];
    sections.extend(params.iter().cloned());
    sections.join("_")
}

/// Read and decode a cached envelope. A corrupt entry counts as a miss and
/// is removed.
pub async fn read_entry<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> Result<Option<CacheEntry<T>>, CacheError> {
    let raw = match store.get(key).await? {
        Some(raw) => raw,
        None => return Ok(None),
    };

    match serde_json::from_str(&raw) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            tracing::warn!("Dropping corrupt cache entry {}: {}", key, e);
            let _ = store.remove(key).await;
            Ok(None)
        }
    }
}

/// Encode and store an envelope under its key.
pub async fn write_entry<T: Serialize>(
    store: &dyn CacheStore,
    key: &str,
    entry: &CacheEntry<T>,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(entry)?;
    store.set(key, raw).await
}
