//! Session model - durable, revocable sign-in records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Session entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Opaque bearer secret handed to the client.
    pub token: String,
    pub organization_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub auth_method: String,
    pub auth_provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request-side context captured when a session is created.
#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub organization_id: Option<Uuid>,
    pub ip_address: String,
    pub user_agent: String,
    pub auth_method: String,
    pub auth_provider: String,
}

/// Partial update applied by `SessionStore::update`. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub expires_at: Option<DateTime<Utc>>,
    pub organization_id: Option<Option<Uuid>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub auth_method: Option<String>,
    pub auth_provider: Option<String>,
}

impl Session {
    /// Create a new session expiring `ttl` after `now`.
    pub fn new(
        user_id: Uuid,
        token: String,
        metadata: SessionMetadata,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token,
            organization_id: metadata.organization_id,
            expires_at: now + ttl,
            ip_address: metadata.ip_address,
            user_agent: metadata.user_agent,
            auth_method: metadata.auth_method,
            auth_provider: metadata.auth_provider,
            created_at: now,
            updated_at: now,
        }
    }

    /// Expired once `now` is strictly past the deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left before expiry; zero or negative when already expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Apply a partial update and stamp `updated_at`.
    pub fn apply(&mut self, update: SessionUpdate, now: DateTime<Utc>) {
        if let Some(expires_at) = update.expires_at {
            self.expires_at = expires_at;
        }
        if let Some(organization_id) = update.organization_id {
            self.organization_id = organization_id;
        }
        if let Some(ip_address) = update.ip_address {
            self.ip_address = ip_address;
        }
        if let Some(user_agent) = update.user_agent {
            self.user_agent = user_agent;
        }
        if let Some(auth_method) = update.auth_method {
            self.auth_method = auth_method;
        }
        if let Some(auth_provider) = update.auth_provider {
            self.auth_provider = auth_provider;
        }
        self.updated_at = now;
    }
}
