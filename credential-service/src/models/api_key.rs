//! API key model - long-lived scoped credentials for programmatic access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Environment segment embedded in every plaintext key (`sk_{env}_...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyEnvironment {
    Live,
    Test,
}

impl ApiKeyEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyEnvironment::Live => "live",
            ApiKeyEnvironment::Test => "test",
        }
    }
}

impl std::str::FromStr for ApiKeyEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(ApiKeyEnvironment::Live),
            "test" => Ok(ApiKeyEnvironment::Test),
            _ => Err(format!("Invalid API key environment: {}", s)),
        }
    }
}

/// Stored API key record. Only the hash of the plaintext key is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub key_hash: String,
    /// First 8 characters of the plaintext key; a non-secret lookup index.
    pub prefix: String,
    pub scopes: Vec<String>,
    /// Requests per minute.
    pub rate_limit: i32,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// API key as returned to callers after validation; never carries the hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub prefix: String,
    pub scopes: Vec<String>,
    pub rate_limit: i32,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiToken {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            user_id: key.user_id,
            organization_id: key.organization_id,
            name: key.name,
            prefix: key.prefix,
            scopes: key.scopes,
            rate_limit: key.rate_limit,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

/// Issuance response. `key` is the only time the plaintext is ever visible.
#[derive(Debug, Clone, Serialize)]
pub struct ApiTokenResponse {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub prefix: String,
    pub scopes: Vec<String>,
    pub rate_limit: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
