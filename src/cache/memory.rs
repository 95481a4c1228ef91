use crate::cache::CacheStore;
use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process store, used when Redis is unreachable and in tests.
///
/// An optional capacity bounds the number of keys. Inserting a new key at
/// capacity reports `QuotaExceeded`, the same shape a full Redis produces;
/// overwriting an existing key always goes through.
pub struct MemoryStore {
    data: RwLock<HashMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            capacity: None,
        }
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut data = self.data.write().await;
        if let Some(capacity) = self.capacity {
            if !data.contains_key(key) && data.len() >= capacity {
                return Err(CacheError::QuotaExceeded);
            }
        }
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.data.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.data.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MemoryStore::new();

        assert!(store.get("a").await.unwrap().is_none());
        store.set("a", "1".to_string()).await.unwrap();
        store.set("b", "2".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        store.remove("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());

        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = MemoryStore::with_capacity_limit(2);
        store.set("a", "1".to_string()).await.unwrap();
        store.set("b", "2".to_string()).await.unwrap();

        // New key at capacity is refused
        let err = store.set("c", "3".to_string()).await.unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded));

        // Overwrites still work
        store.set("a", "updated".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("updated".to_string()));

        // Freed space admits the new key
        store.remove("b").await.unwrap();
        store.set("c", "3".to_string()).await.unwrap();
        assert_eq!(store.get("c").await.unwrap(), Some("3".to_string()));
    }
}
