use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::cache::Cache;
use super::cache_aside::{CacheAside, Lookup};
use super::clock::Clock;
use super::error::ServiceError;
use super::metrics::CredentialMetrics;
use super::repository::SessionRepository;
use crate::config::SessionConfig;
use crate::models::{Session, SessionMetadata, SessionUpdate};
use crate::utils::tokens::generate_url_token;

/// Durable, revocable sessions with a cache-aside read path keyed by session id.
///
/// Every read path re-checks expiry against the clock before returning, so no
/// caller ever sees a session whose `expires_at` has passed.
#[derive(Clone)]
pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
    cache: CacheAside<Session>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    metrics: Arc<CredentialMetrics>,
}

impl SessionStore {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        cache: Option<Arc<dyn Cache<Session>>>,
        config: &SessionConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<CredentialMetrics>,
    ) -> Self {
        Self {
            repository,
            cache: CacheAside::new(cache, "sessions", metrics.clone()),
            ttl: config.ttl(),
            clock,
            metrics,
        }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> Result<Session, ServiceError> {
        let now = self.clock.now();
        let session = Session::new(user_id, generate_url_token(), metadata, now, self.ttl);

        self.repository.create_session(&session).await?;
        self.cache
            .store(&session.id.to_string(), &session, self.cache_ttl(&session, now))
            .await;

        tracing::info!(user_id = %user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Session, ServiceError> {
        let result = self.get_unrecorded(session_id).await;
        self.record("session", &result);
        result
    }

    async fn get_unrecorded(&self, session_id: Uuid) -> Result<Session, ServiceError> {
        let now = self.clock.now();
        let repository = self.repository.clone();

        let lookup = self
            .cache
            .read_through(
                &session_id.to_string(),
                |s: &Session| !s.is_expired_at(now),
                || async move { repository.get_session(session_id).await },
                |s: &Session| self.cache_ttl(s, now),
            )
            .await?;

        match lookup {
            Lookup::Hit(session) => Ok(session),
            Lookup::Fetched(session) => self.reject_if_expired(session, now).await,
            Lookup::Miss => Err(ServiceError::SessionNotFound),
        }
    }

    /// Database-only lookup; the cache is keyed by id, not by token.
    pub async fn get_by_token(&self, token: &str) -> Result<Session, ServiceError> {
        let now = self.clock.now();
        match self.repository.get_session_by_token(token).await? {
            Some(session) => self.reject_if_expired(session, now).await,
            None => Err(ServiceError::SessionNotFound),
        }
    }

    /// Validate a session token and stamp its activity time. A failed stamp
    /// does not fail validation.
    pub async fn validate(&self, token: &str) -> Result<Session, ServiceError> {
        let result = self.validate_unrecorded(token).await;
        self.record("session_token", &result);
        result
    }

    async fn validate_unrecorded(&self, token: &str) -> Result<Session, ServiceError> {
        let mut session = self.get_by_token(token).await?;
        let now = self.clock.now();

        match self.repository.touch_session(session.id, now).await {
            Ok(true) => {
                // The cached copy carries the old activity time.
                self.cache.invalidate(&session.id.to_string()).await;
                session.updated_at = now;
                Ok(session)
            }
            Ok(false) => {
                self.cache.invalidate(&session.id.to_string()).await;
                Err(ServiceError::SessionNotFound)
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Failed to record session activity");
                Ok(session)
            }
        }
    }

    pub async fn update(
        &self,
        session_id: Uuid,
        update: SessionUpdate,
    ) -> Result<Session, ServiceError> {
        let now = self.clock.now();
        let session = match self.repository.get_session(session_id).await? {
            Some(session) => self.reject_if_expired(session, now).await?,
            None => return Err(ServiceError::SessionNotFound),
        };

        let mut updated = session;
        updated.apply(update, now);
        if updated.is_expired_at(now) {
            return Err(ServiceError::Validation(
                "Session expiry must be in the future".to_string(),
            ));
        }

        self.persist(&updated).await?;
        Ok(updated)
    }

    /// Extend a session by the configured TTL from now.
    pub async fn refresh_session(&self, session_id: Uuid) -> Result<Session, ServiceError> {
        let mut session = self.get(session_id).await?;
        let now = self.clock.now();
        session.expires_at = now + self.ttl;
        session.updated_at = now;

        self.persist(&session).await?;
        tracing::debug!(session_id = %session_id, "Session refreshed");
        Ok(session)
    }

    pub async fn delete(&self, session_id: Uuid) -> Result<(), ServiceError> {
        let deleted = self.repository.delete_session(session_id).await?;
        self.cache.invalidate(&session_id.to_string()).await;

        if !deleted {
            return Err(ServiceError::SessionNotFound);
        }
        tracing::info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    pub async fn delete_by_token(&self, token: &str) -> Result<(), ServiceError> {
        match self.repository.delete_session_by_token(token).await? {
            Some(session_id) => {
                self.cache.invalidate(&session_id.to_string()).await;
                tracing::info!(session_id = %session_id, "Session deleted");
                Ok(())
            }
            None => Err(ServiceError::SessionNotFound),
        }
    }

    /// Revoke every session of a user, evicting each from the cache.
    pub async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let ids = self.repository.delete_sessions_by_user(user_id).await?;
        for id in &ids {
            self.cache.invalidate(&id.to_string()).await;
        }

        tracing::info!(user_id = %user_id, count = ids.len(), "Sessions revoked for user");
        Ok(ids.len() as u64)
    }

    /// Active sessions of a user. Reads the repository directly.
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, ServiceError> {
        let now = self.clock.now();
        let sessions = self.repository.list_sessions_by_user(user_id, now).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| !s.is_expired_at(now))
            .collect())
    }

    pub async fn cleanup_expired(&self) -> Result<u64, ServiceError> {
        let deleted = self
            .repository
            .delete_expired_sessions(self.clock.now())
            .await?;
        if deleted > 0 {
            tracing::info!(count = deleted, "Expired sessions removed");
        }
        Ok(deleted)
    }

    /// Write through to the repository and evict; the next `get` repopulates.
    async fn persist(&self, session: &Session) -> Result<(), ServiceError> {
        let updated = self.repository.update_session(session).await;
        self.cache.invalidate(&session.id.to_string()).await;
        if !updated? {
            return Err(ServiceError::SessionNotFound);
        }
        Ok(())
    }

    /// Expired records found in the repository are deleted on the spot.
    async fn reject_if_expired(
        &self,
        session: Session,
        now: DateTime<Utc>,
    ) -> Result<Session, ServiceError> {
        if !session.is_expired_at(now) {
            return Ok(session);
        }

        self.cache.invalidate(&session.id.to_string()).await;
        if let Err(e) = self.repository.delete_session(session.id).await {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to delete expired session");
        }
        Err(ServiceError::SessionExpired)
    }

    /// Remaining lifetime, capped at the session TTL.
    fn cache_ttl(&self, session: &Session, now: DateTime<Utc>) -> Duration {
        session.remaining_at(now).min(self.ttl)
    }

    fn record(&self, credential: &str, result: &Result<Session, ServiceError>) {
        match result {
            Ok(_) => self.metrics.record_validation(credential, "ok"),
            Err(e) => {
                tracing::debug!(kind = e.kind().as_str(), "Session rejected");
                self.metrics.record_validation(credential, e.kind().as_str());
            }
        }
    }
}
