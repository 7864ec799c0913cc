use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

use super::cache::Cache;

/// Open a managed (auto-reconnecting) Redis connection.
pub async fn connect(config: &crate::config::RedisConfig) -> Result<ConnectionManager, anyhow::Error> {
    tracing::info!("Connecting to Redis");
    let client = Client::open(config.url.clone())?;

    let manager = client.get_connection_manager().await.map_err(|e| {
        tracing::error!("Failed to get Redis connection manager: {}", e);
        anyhow::anyhow!("Failed to connect to Redis: {}", e)
    })?;

    tracing::info!("Successfully connected to Redis");
    Ok(manager)
}

pub async fn health_check(manager: &ConnectionManager) -> Result<(), anyhow::Error> {
    let mut conn = manager.clone();
    redis::cmd("PING")
        .query_async::<_, ()>(&mut conn)
        .await
        .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
}

/// JSON-encoded values under `{namespace}:{key}`, expiring via `SET ... PX`.
pub struct RedisCache<V> {
    manager: ConnectionManager,
    namespace: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for RedisCache<V> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            namespace: self.namespace.clone(),
            _value: PhantomData,
        }
    }
}

impl<V> RedisCache<V> {
    pub fn new(manager: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            manager,
            namespace: namespace.into(),
            _value: PhantomData,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl<V> Cache<V> for RedisCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &V, ttl: Duration) -> Result<(), anyhow::Error> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if ttl_ms == 0 {
            return Ok(());
        }
        let payload = serde_json::to_string(value)?;

        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(payload)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check cache key: {}", e))?;
        Ok(exists)
    }
}
