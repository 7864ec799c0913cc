//! Shared check-cache / fall-back / repopulate logic for the credential stores.

use std::future::Future;
use std::sync::Arc;

use super::cache::Cache;
use super::error::ServiceError;
use super::metrics::CredentialMetrics;

/// Where a read-through value came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// Served from cache and accepted by the freshness check.
    Hit(V),
    /// Loaded from the repository. Callers must still apply their own checks.
    Fetched(V),
    Miss,
}

/// Cache-aside wrapper. Cache failures are logged, counted and otherwise ignored.
pub struct CacheAside<V> {
    cache: Option<Arc<dyn Cache<V>>>,
    name: &'static str,
    metrics: Arc<CredentialMetrics>,
}

impl<V> Clone for CacheAside<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            name: self.name,
            metrics: self.metrics.clone(),
        }
    }
}

impl<V> CacheAside<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(
        cache: Option<Arc<dyn Cache<V>>>,
        name: &'static str,
        metrics: Arc<CredentialMetrics>,
    ) -> Self {
        Self {
            cache,
            name,
            metrics,
        }
    }

    pub async fn lookup(&self, key: &str) -> Option<V> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(cache = self.name, error = %e, "Cache read failed");
                self.metrics.record_cache_error(self.name, "get");
                None
            }
        }
    }

    /// Write `value` for `ttl`. A zero, negative or unrepresentable TTL is skipped.
    pub async fn store(&self, key: &str, value: &V, ttl: chrono::Duration) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let ttl = match ttl.to_std() {
            Ok(ttl) if !ttl.is_zero() => ttl,
            _ => return,
        };
        if let Err(e) = cache.set(key, value, ttl).await {
            tracing::warn!(cache = self.name, error = %e, "Cache write failed");
            self.metrics.record_cache_error(self.name, "set");
        }
    }

    pub async fn invalidate(&self, key: &str) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache.delete(key).await {
            tracing::warn!(cache = self.name, error = %e, "Cache delete failed");
            self.metrics.record_cache_error(self.name, "delete");
        }
    }

    /// Serve `key` from cache when `is_fresh` accepts it, otherwise load it with
    /// `fetch`. A rejected cache entry is evicted. A fetched value is written
    /// back only when `is_fresh` accepts it, for `ttl_for(value)`.
    pub async fn read_through<Fresh, Fetch, Fut, Ttl>(
        &self,
        key: &str,
        is_fresh: Fresh,
        fetch: Fetch,
        ttl_for: Ttl,
    ) -> Result<Lookup<V>, ServiceError>
    where
        Fresh: Fn(&V) -> bool,
        Fetch: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, ServiceError>>,
        Ttl: FnOnce(&V) -> chrono::Duration,
    {
        if let Some(cached) = self.lookup(key).await {
            if is_fresh(&cached) {
                return Ok(Lookup::Hit(cached));
            }
            self.invalidate(key).await;
        }

        match fetch().await? {
            Some(value) => {
                if is_fresh(&value) {
                    let ttl = ttl_for(&value);
                    self.store(key, &value, ttl).await;
                }
                Ok(Lookup::Fetched(value))
            }
            None => Ok(Lookup::Miss),
        }
    }
}
