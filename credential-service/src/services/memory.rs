//! In-memory repository backend for tests and local runs.
//!
//! Mirrors the PostgreSQL semantics, including the conditional single-writer
//! `mark_magic_link_used`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::error::ServiceError;
use super::repository::{ApiKeyRepository, MagicLinkRepository, SessionRepository};
use crate::models::{ApiKey, MagicLinkToken, Session};

#[derive(Default)]
pub struct InMemoryRepository {
    sessions: Mutex<HashMap<Uuid, Session>>,
    api_keys: Mutex<HashMap<Uuid, ApiKey>>,
    magic_links: Mutex<HashMap<Uuid, MagicLinkToken>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ServiceError> {
    mutex
        .lock()
        .map_err(|_| ServiceError::Database(anyhow::anyhow!("In-memory store lock poisoned")))
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn api_key_count(&self) -> usize {
        self.api_keys.lock().map(|k| k.len()).unwrap_or(0)
    }

    pub fn magic_link_count(&self) -> usize {
        self.magic_links.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn create_session(&self, session: &Session) -> Result<(), ServiceError> {
        let mut sessions = lock(&self.sessions)?;
        if sessions.values().any(|s| s.token == session.token) {
            return Err(ServiceError::Database(anyhow::anyhow!(
                "duplicate session token"
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError> {
        Ok(lock(&self.sessions)?.get(&id).cloned())
    }

    async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>, ServiceError> {
        Ok(lock(&self.sessions)?
            .values()
            .find(|s| s.token == token)
            .cloned())
    }

    async fn update_session(&self, session: &Session) -> Result<bool, ServiceError> {
        let mut sessions = lock(&self.sessions)?;
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_session(
        &self,
        id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        match lock(&self.sessions)?.get_mut(&id) {
            Some(session) => {
                session.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, ServiceError> {
        Ok(lock(&self.sessions)?.remove(&id).is_some())
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<Option<Uuid>, ServiceError> {
        let mut sessions = lock(&self.sessions)?;
        let id = sessions
            .values()
            .find(|s| s.token == token)
            .map(|s| s.id);
        if let Some(id) = id {
            sessions.remove(&id);
        }
        Ok(id)
    }

    async fn delete_sessions_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let mut sessions = lock(&self.sessions)?;
        let ids: Vec<Uuid> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();
        for id in &ids {
            sessions.remove(id);
        }
        Ok(ids)
    }

    async fn list_sessions_by_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError> {
        let mut found: Vec<Session> = lock(&self.sessions)?
            .values()
            .filter(|s| s.user_id == user_id && !s.is_expired_at(now))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryRepository {
    async fn create_api_key(&self, key: &ApiKey) -> Result<(), ServiceError> {
        let mut keys = lock(&self.api_keys)?;
        if keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(ServiceError::Database(anyhow::anyhow!("duplicate key hash")));
        }
        keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn get_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, ServiceError> {
        Ok(lock(&self.api_keys)?.get(&id).cloned())
    }

    async fn find_api_key(
        &self,
        prefix: &str,
        key_hash: &str,
    ) -> Result<Option<ApiKey>, ServiceError> {
        Ok(lock(&self.api_keys)?
            .values()
            .find(|k| k.prefix == prefix && k.key_hash == key_hash)
            .cloned())
    }

    async fn list_api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, ServiceError> {
        let mut found: Vec<ApiKey> = lock(&self.api_keys)?
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn delete_api_key(&self, id: Uuid) -> Result<bool, ServiceError> {
        Ok(lock(&self.api_keys)?.remove(&id).is_some())
    }

    async fn delete_api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, ServiceError> {
        let mut keys = lock(&self.api_keys)?;
        let ids: Vec<Uuid> = keys
            .values()
            .filter(|k| k.user_id == user_id)
            .map(|k| k.id)
            .collect();
        Ok(ids.iter().filter_map(|id| keys.remove(id)).collect())
    }

    async fn touch_api_key(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), ServiceError> {
        if let Some(key) = lock(&self.api_keys)?.get_mut(&id) {
            key.last_used_at = Some(used_at);
            key.updated_at = used_at;
        }
        Ok(())
    }

    async fn delete_expired_api_keys(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ServiceError> {
        let mut keys = lock(&self.api_keys)?;
        let expired: Vec<Uuid> = keys
            .values()
            .filter(|k| k.is_expired_at(now))
            .map(|k| k.id)
            .collect();
        for id in &expired {
            keys.remove(id);
        }
        Ok(expired)
    }
}

#[async_trait]
impl MagicLinkRepository for InMemoryRepository {
    async fn create_magic_link(
        &self,
        token: &MagicLinkToken,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<bool, ServiceError> {
        let mut links = lock(&self.magic_links)?;
        let recent = links
            .values()
            .filter(|t| t.identifier == token.identifier && t.created_at > since)
            .count() as i64;
        if recent >= limit {
            return Ok(false);
        }

        let mut stored = token.clone();
        stored.token = None;
        links.insert(stored.id, stored);
        Ok(true)
    }

    async fn get_magic_link_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<MagicLinkToken>, ServiceError> {
        Ok(lock(&self.magic_links)?
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn get_magic_link_by_code(
        &self,
        identifier: &str,
        code: &str,
    ) -> Result<Option<MagicLinkToken>, ServiceError> {
        Ok(lock(&self.magic_links)?
            .values()
            .filter(|t| t.identifier == identifier && t.code.as_deref() == Some(code))
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn count_magic_links_since(
        &self,
        identifier: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        let count = lock(&self.magic_links)?
            .values()
            .filter(|t| t.identifier == identifier && t.created_at > since)
            .count();
        Ok(count as i64)
    }

    async fn mark_magic_link_used(
        &self,
        id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut links = lock(&self.magic_links)?;
        match links.get_mut(&id) {
            Some(token) if token.used_at.is_none() => {
                token.used_at = Some(used_at);
                token.updated_at = used_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired_magic_links(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let mut links = lock(&self.magic_links)?;
        let before = links.len();
        links.retain(|_, t| !t.is_expired_at(now));
        Ok((before - links.len()) as u64)
    }
}
