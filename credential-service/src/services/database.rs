//! PostgreSQL repository backend for sessions, API keys and magic links.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use super::error::ServiceError;
use super::repository::{ApiKeyRepository, MagicLinkRepository, SessionRepository};
use crate::models::{ApiKey, DeliveryMethod, MagicLinkToken, Session};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                ServiceError::Database(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

#[derive(FromRow)]
struct MagicLinkRow {
    id: Uuid,
    user_id: Option<Uuid>,
    token_hash: String,
    code: Option<String>,
    identifier: String,
    delivery_method: String,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    ip_address: String,
    user_agent: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MagicLinkRow> for MagicLinkToken {
    type Error = ServiceError;

    fn try_from(row: MagicLinkRow) -> Result<Self, Self::Error> {
        let delivery_method = row
            .delivery_method
            .parse::<DeliveryMethod>()
            .map_err(|e| ServiceError::Database(anyhow::anyhow!(e)))?;

        Ok(MagicLinkToken {
            id: row.id,
            user_id: row.user_id,
            token: None,
            token_hash: row.token_hash,
            code: row.code,
            identifier: row.identifier,
            delivery_method,
            expires_at: row.expires_at,
            used_at: row.used_at,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ==================== Session Operations ====================

#[async_trait]
impl SessionRepository for Database {
    async fn create_session(&self, session: &Session) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, token, organization_id, expires_at, ip_address, user_agent, auth_method, auth_provider, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.token)
        .bind(session.organization_id)
        .bind(session.expires_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.auth_method)
        .bind(&session.auth_provider)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>, ServiceError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn update_session(&self, session: &Session) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET organization_id = $2, expires_at = $3, ip_address = $4, user_agent = $5,
                auth_method = $6, auth_provider = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(session.organization_id)
        .bind(session.expires_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.auth_method)
        .bind(&session.auth_provider)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_session(
        &self,
        id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query("UPDATE sessions SET updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<Option<Uuid>, ServiceError> {
        let id: Option<Uuid> =
            sqlx::query_scalar("DELETE FROM sessions WHERE token = $1 RETURNING id")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    async fn delete_sessions_by_user(&self, user_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM sessions WHERE user_id = $1 RETURNING id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn list_sessions_by_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError> {
        let sessions = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 AND expires_at >= $2 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== API Key Operations ====================

#[async_trait]
impl ApiKeyRepository for Database {
    async fn create_api_key(&self, key: &ApiKey) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, user_id, organization_id, name, key_hash, prefix, scopes, rate_limit, expires_at, last_used_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(key.id)
        .bind(key.user_id)
        .bind(key.organization_id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.prefix)
        .bind(&key.scopes)
        .bind(key.rate_limit)
        .bind(key.expires_at)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .bind(key.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, ServiceError> {
        let key = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(key)
    }

    async fn find_api_key(
        &self,
        prefix: &str,
        key_hash: &str,
    ) -> Result<Option<ApiKey>, ServiceError> {
        let key = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE prefix = $1 AND key_hash = $2",
        )
        .bind(prefix)
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    async fn list_api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, ServiceError> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn delete_api_key(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, ServiceError> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "DELETE FROM api_keys WHERE user_id = $1 RETURNING *",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn touch_api_key(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), ServiceError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(used_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_api_keys(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ServiceError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM api_keys WHERE expires_at < $1 RETURNING id")
                .bind(now)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

// ==================== Magic Link Operations ====================

#[async_trait]
impl MagicLinkRepository for Database {
    async fn create_magic_link(
        &self,
        token: &MagicLinkToken,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;

        // Serializes issuers for one identifier until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&token.identifier)
            .execute(&mut *tx)
            .await?;

        let recent: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM magic_link_tokens WHERE identifier = $1 AND created_at > $2",
        )
        .bind(&token.identifier)
        .bind(since)
        .fetch_one(&mut *tx)
        .await?;
        if recent >= limit {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO magic_link_tokens (id, user_id, token_hash, code, identifier, delivery_method, expires_at, used_at, ip_address, user_agent, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(&token.code)
        .bind(&token.identifier)
        .bind(token.delivery_method.as_str())
        .bind(token.expires_at)
        .bind(token.used_at)
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .bind(token.created_at)
        .bind(token.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_magic_link_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<MagicLinkToken>, ServiceError> {
        sqlx::query_as::<_, MagicLinkRow>("SELECT * FROM magic_link_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .map(MagicLinkToken::try_from)
            .transpose()
    }

    async fn get_magic_link_by_code(
        &self,
        identifier: &str,
        code: &str,
    ) -> Result<Option<MagicLinkToken>, ServiceError> {
        sqlx::query_as::<_, MagicLinkRow>(
            r#"
            SELECT * FROM magic_link_tokens
            WHERE identifier = $1 AND code = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(identifier)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .map(MagicLinkToken::try_from)
        .transpose()
    }

    async fn count_magic_links_since(
        &self,
        identifier: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM magic_link_tokens WHERE identifier = $1 AND created_at > $2",
        )
        .bind(identifier)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_magic_link_used(
        &self,
        id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            "UPDATE magic_link_tokens SET used_at = $2, updated_at = $2 WHERE id = $1 AND used_at IS NULL",
        )
        .bind(id)
        .bind(used_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired_magic_links(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = sqlx::query("DELETE FROM magic_link_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
