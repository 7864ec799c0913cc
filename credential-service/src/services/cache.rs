//! Generic TTL cache seam.
//!
//! The cache is only ever a fast path in front of a repository. Every
//! implementation here, including [`NoopCache`], must be substitutable without
//! changing any outcome.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Cache<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>, anyhow::Error>;
    async fn set(&self, key: &str, value: &V, ttl: Duration) -> Result<(), anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error>;
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Process-local cache. Expired entries are evicted lazily on read.
pub struct InMemoryCache<V> {
    entries: DashMap<String, Entry<V>>,
}

impl<V> Default for InMemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> InMemoryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<V> Cache<V> for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>, anyhow::Error> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &V, ttl: Duration) -> Result<(), anyhow::Error> {
        if ttl.is_zero() {
            return Ok(());
        }
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| anyhow::anyhow!("Cache TTL out of range: {:?}", ttl))?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl<V> Cache<V> for NoopCache
where
    V: Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> Result<Option<V>, anyhow::Error> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &V, _ttl: Duration) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool, anyhow::Error> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_set_get_delete() {
        let cache = InMemoryCache::<String>::new();
        cache
            .set("k", &"v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert!(cache.exists("k").await.unwrap());

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_entry_expires() {
        let cache = InMemoryCache::<u32>::new();
        cache.set("k", &7, Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_written() {
        let cache = InMemoryCache::<u32>::new();
        cache.set("k", &7, Duration::ZERO).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_noop_cache_never_hits() {
        let cache = NoopCache;
        Cache::<u32>::set(&cache, "k", &7, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(Cache::<u32>::get(&cache, "k").await.unwrap(), None);
    }
}
