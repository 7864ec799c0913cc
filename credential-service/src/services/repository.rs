//! Persistence seams, one per credential kind.
//!
//! Lookups return `Ok(None)` for absence. `Err` always means the store itself
//! failed and says nothing about the credential.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::ServiceError;
use crate::models::{ApiKey, MagicLinkToken, Session};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<(), ServiceError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError>;

    async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>, ServiceError>;

    /// Overwrite the stored row. Returns `false` when no row has this id.
    async fn update_session(&self, session: &Session) -> Result<bool, ServiceError>;

    /// Set `updated_at` only, leaving every other column as stored. Returns
    /// `false` when no row has this id.
    async fn touch_session(&self, id: Uuid, updated_at: DateTime<Utc>)
        -> Result<bool, ServiceError>;

    /// Returns `false` when no row was deleted.
    async fn delete_session(&self, id: Uuid) -> Result<bool, ServiceError>;

    async fn delete_session_by_token(&self, token: &str) -> Result<Option<Uuid>, ServiceError>;

    /// Delete every session of a user and return the deleted ids.
    async fn delete_sessions_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>, ServiceError>;

    /// Sessions of a user that are still valid at `now`, newest first.
    async fn list_sessions_by_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError>;

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn create_api_key(&self, key: &ApiKey) -> Result<(), ServiceError>;

    async fn get_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, ServiceError>;

    async fn find_api_key(
        &self,
        prefix: &str,
        key_hash: &str,
    ) -> Result<Option<ApiKey>, ServiceError>;

    async fn list_api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, ServiceError>;

    async fn delete_api_key(&self, id: Uuid) -> Result<bool, ServiceError>;

    /// Delete every key of a user and return the deleted records.
    async fn delete_api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, ServiceError>;

    async fn touch_api_key(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), ServiceError>;

    /// Delete keys expired at `now` and return their ids.
    async fn delete_expired_api_keys(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ServiceError>;
}

#[async_trait]
pub trait MagicLinkRepository: Send + Sync {
    /// Insert `token` unless its identifier already has `limit` tokens
    /// created after `since`. The count and the insert are atomic per
    /// identifier. Returns `false` when the limit was reached.
    async fn create_magic_link(
        &self,
        token: &MagicLinkToken,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<bool, ServiceError>;

    async fn get_magic_link_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<MagicLinkToken>, ServiceError>;

    /// Most recent token for `identifier` carrying `code`.
    async fn get_magic_link_by_code(
        &self,
        identifier: &str,
        code: &str,
    ) -> Result<Option<MagicLinkToken>, ServiceError>;

    async fn count_magic_links_since(
        &self,
        identifier: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, ServiceError>;

    /// Set `used_at` only if it is still unset. Returns `false` when another
    /// caller got there first.
    async fn mark_magic_link_used(
        &self,
        id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    async fn delete_expired_magic_links(&self, now: DateTime<Utc>) -> Result<u64, ServiceError>;
}
