use chrono::Duration;
use http::HeaderMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::cache::Cache;
use super::cache_aside::{CacheAside, Lookup};
use super::clock::Clock;
use super::error::ServiceError;
use super::last_used::LastUsedTracker;
use super::metrics::CredentialMetrics;
use super::rate_limit::ApiKeyRateLimiter;
use super::repository::ApiKeyRepository;
use crate::config::ApiKeyConfig;
use crate::models::{ApiKey, ApiKeyEnvironment, ApiToken, ApiTokenResponse};
use crate::utils::tokens::{constant_time_eq, generate_secret, hash_secret};

/// Length of the non-secret lookup prefix.
pub const API_KEY_PREFIX_LEN: usize = 8;
const API_KEY_SECRET_LEN: usize = 64;

/// Headers checked, in order, by [`extract_api_key_from_headers`].
const API_KEY_HEADERS: [&str; 3] = ["authorization", "x-api-key", "api-key"];

/// Long-lived, scoped, rate-limited API keys.
///
/// Only the SHA-256 of a key is ever stored or cached. The plaintext is
/// returned once, from [`ApiTokenStore::create_token`].
#[derive(Clone)]
pub struct ApiTokenStore {
    repository: Arc<dyn ApiKeyRepository>,
    cache: CacheAside<ApiKey>,
    environment: ApiKeyEnvironment,
    default_rate_limit: i32,
    last_used: LastUsedTracker,
    rate_limiter: ApiKeyRateLimiter,
    clock: Arc<dyn Clock>,
    metrics: Arc<CredentialMetrics>,
}

impl ApiTokenStore {
    /// Must be called inside a Tokio runtime; starts the last-used worker.
    pub fn new(
        repository: Arc<dyn ApiKeyRepository>,
        cache: Option<Arc<dyn Cache<ApiKey>>>,
        config: &ApiKeyConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<CredentialMetrics>,
    ) -> Self {
        let (last_used, _worker) = LastUsedTracker::spawn(
            repository.clone(),
            config.last_used_queue_capacity,
            config.last_used_timeout(),
            metrics.clone(),
        );

        Self {
            repository,
            cache: CacheAside::new(cache, "api_keys", metrics.clone()),
            environment: config.environment,
            default_rate_limit: config.default_rate_limit,
            last_used,
            rate_limiter: ApiKeyRateLimiter::new(),
            clock,
            metrics,
        }
    }

    pub async fn create_token(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        name: &str,
        scopes: Vec<String>,
        expires_in: Duration,
    ) -> Result<ApiTokenResponse, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation(
                "API key name must not be empty".to_string(),
            ));
        }
        if expires_in <= Duration::zero() {
            return Err(ServiceError::Validation(
                "API key lifetime must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(expires_in).ok_or_else(|| {
            ServiceError::Validation("API key lifetime is out of range".to_string())
        })?;

        let plaintext = format!("sk_{}_{}", self.environment.as_str(), generate_secret());
        let prefix = plaintext[..API_KEY_PREFIX_LEN].to_string();

        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id,
            organization_id,
            name: name.trim().to_string(),
            key_hash: hash_secret(&plaintext),
            prefix: prefix.clone(),
            scopes,
            rate_limit: self.default_rate_limit,
            expires_at,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };

        self.repository.create_api_key(&key).await?;
        self.cache.store(&prefix, &key, expires_in).await;

        tracing::info!(
            user_id = %user_id,
            key_id = %key.id,
            prefix = %prefix,
            "API key created"
        );

        Ok(ApiTokenResponse {
            id: key.id,
            name: key.name,
            key: plaintext,
            prefix,
            scopes: key.scopes,
            rate_limit: key.rate_limit,
            expires_at: key.expires_at,
            created_at: key.created_at,
        })
    }

    pub async fn validate_token(&self, key: &str) -> Result<ApiToken, ServiceError> {
        let result = self.validate_unrecorded(key).await;
        match &result {
            Ok(_) => self.metrics.record_validation("api_key", "ok"),
            Err(e) => {
                tracing::debug!(kind = e.kind().as_str(), "API key rejected");
                self.metrics.record_validation("api_key", e.kind().as_str());
            }
        }
        result
    }

    async fn validate_unrecorded(&self, key: &str) -> Result<ApiToken, ServiceError> {
        if !validate_api_key_format(key) {
            return Err(ServiceError::InvalidApiKeyFormat);
        }

        let prefix = &key[..API_KEY_PREFIX_LEN];
        let presented_hash = hash_secret(key);
        let now = self.clock.now();
        let repository = self.repository.clone();
        let lookup_hash = presented_hash.clone();
        let lookup_prefix = prefix.to_string();

        let lookup = self
            .cache
            .read_through(
                prefix,
                |k: &ApiKey| constant_time_eq(&k.key_hash, &presented_hash) && !k.is_expired_at(now),
                || async move { repository.find_api_key(&lookup_prefix, &lookup_hash).await },
                |k: &ApiKey| k.expires_at - now,
            )
            .await?;

        let api_key = match lookup {
            Lookup::Hit(api_key) => api_key,
            Lookup::Fetched(api_key) => {
                if !constant_time_eq(&api_key.key_hash, &presented_hash) {
                    return Err(ServiceError::InvalidApiKey);
                }
                if api_key.is_expired_at(now) {
                    return Err(ServiceError::ApiKeyExpired);
                }
                api_key
            }
            Lookup::Miss => return Err(ServiceError::InvalidApiKey),
        };

        self.last_used.record(api_key.id, now);
        Ok(api_key.into())
    }

    pub async fn validate_token_with_scopes<S: AsRef<str>>(
        &self,
        key: &str,
        required_scopes: &[S],
    ) -> Result<ApiToken, ServiceError> {
        let token = self.validate_token(key).await?;
        validate_scopes(&token.scopes, required_scopes)?;
        Ok(token)
    }

    pub async fn validate_token_for_organization(
        &self,
        key: &str,
        organization_id: Uuid,
    ) -> Result<ApiToken, ServiceError> {
        let token = self.validate_token(key).await?;
        if token.organization_id != organization_id {
            tracing::warn!(
                key_id = %token.id,
                organization_id = %organization_id,
                "API key used outside its organization"
            );
            return Err(ServiceError::UnauthorizedOrganization);
        }
        Ok(token)
    }

    /// Consume one request from the key's per-minute budget.
    pub fn check_rate_limit(&self, token: &ApiToken) -> Result<(), ServiceError> {
        self.rate_limiter.check(token.id, token.rate_limit)
    }

    pub async fn list_tokens_by_user(&self, user_id: Uuid) -> Result<Vec<ApiToken>, ServiceError> {
        let keys = self.repository.list_api_keys_by_user(user_id).await?;
        Ok(keys.into_iter().map(ApiToken::from).collect())
    }

    /// Revoke one key. The repository delete decides the outcome; the cache
    /// eviction is always attempted as well.
    pub async fn revoke_token(&self, key_id: Uuid) -> Result<(), ServiceError> {
        let api_key = self
            .repository
            .get_api_key(key_id)
            .await?
            .ok_or(ServiceError::TokenNotFound)?;

        let deleted = self.repository.delete_api_key(key_id).await;
        self.cache.invalidate(&api_key.prefix).await;
        self.rate_limiter.remove(key_id);

        if !deleted? {
            return Err(ServiceError::TokenNotFound);
        }

        tracing::info!(key_id = %key_id, prefix = %api_key.prefix, "API key revoked");
        Ok(())
    }

    pub async fn revoke_user_tokens(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let revoked = self.repository.delete_api_keys_by_user(user_id).await?;

        let prefixes: BTreeSet<&str> = revoked.iter().map(|k| k.prefix.as_str()).collect();
        for prefix in prefixes {
            self.cache.invalidate(prefix).await;
        }
        for key in &revoked {
            self.rate_limiter.remove(key.id);
        }

        tracing::info!(user_id = %user_id, count = revoked.len(), "API keys revoked for user");
        Ok(revoked.len() as u64)
    }

    /// Scopes granted to a stored key.
    pub async fn list_scopes_for_token(&self, key_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let api_key = self
            .repository
            .get_api_key(key_id)
            .await?
            .ok_or(ServiceError::TokenNotFound)?;
        Ok(api_key.scopes)
    }

    /// Delete expired keys and drop their rate limiters.
    pub async fn cleanup_expired(&self) -> Result<u64, ServiceError> {
        let deleted = self
            .repository
            .delete_expired_api_keys(self.clock.now())
            .await?;
        for id in &deleted {
            self.rate_limiter.remove(*id);
        }
        if !deleted.is_empty() {
            tracing::info!(count = deleted.len(), "Expired API keys removed");
        }
        Ok(deleted.len() as u64)
    }

    pub fn rate_limiter_count(&self) -> usize {
        self.rate_limiter.len()
    }

    pub fn environment(&self) -> ApiKeyEnvironment {
        self.environment
    }
}

/// True only for `sk_(live|test)_` followed by exactly 64 lowercase hex characters.
pub fn validate_api_key_format(key: &str) -> bool {
    let Some(rest) = key.strip_prefix("sk_") else {
        return false;
    };
    let Some((environment, secret)) = rest.split_once('_') else {
        return false;
    };

    environment.parse::<ApiKeyEnvironment>().is_ok()
        && secret.len() == API_KEY_SECRET_LEN
        && secret
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Pull an API key out of a single header value.
///
/// Accepts `APIKey <key>`, `Bearer sk_...` and a bare `sk_...`. Returns an
/// empty string when nothing recognisable is present; deciding that a
/// credential is missing is left to the caller.
pub fn parse_api_key(header_value: &str) -> String {
    let value = header_value.trim();

    if let Some(scheme) = value.get(..7) {
        if scheme.eq_ignore_ascii_case("apikey ") {
            return value[7..].trim().to_string();
        }
        if scheme.eq_ignore_ascii_case("bearer ") {
            let key = value[7..].trim();
            if key.starts_with("sk_") {
                return key.to_string();
            }
        }
    }

    if value.starts_with("sk_") {
        return value.to_string();
    }

    String::new()
}

/// First key found in `Authorization`, `X-API-Key` or `Api-Key`, in that order.
pub fn extract_api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    API_KEY_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(parse_api_key)
        .find(|key| !key.is_empty())
}

/// Every required scope must be granted, either exactly, by its parent
/// (`pipelines` grants `pipelines:read`), or by a `*`/`admin` scope.
pub fn validate_scopes<H, R>(granted: &[H], required: &[R]) -> Result<(), ServiceError>
where
    H: AsRef<str>,
    R: AsRef<str>,
{
    if required.is_empty() {
        return Ok(());
    }

    let granted: HashSet<&str> = granted.iter().map(|s| s.as_ref()).collect();
    if granted.contains("*") || granted.contains("admin") {
        return Ok(());
    }

    for scope in required {
        let scope = scope.as_ref();
        if granted.contains(scope) {
            continue;
        }
        if let Some((parent, _)) = scope.split_once(':') {
            if granted.contains(parent) {
                continue;
            }
        }
        return Err(ServiceError::InsufficientScopes);
    }

    Ok(())
}

/// Human-readable description for well-known scopes; unknown scopes echo back.
pub fn scope_description(scope: &str) -> &str {
    match scope {
        "read" => "Read access to resources",
        "write" => "Write access to resources",
        "admin" => "Administrative access",
        "pipelines:read" => "Read access to pipelines",
        "pipelines:write" => "Write access to pipelines",
        "pipelines:execute" => "Execute pipelines",
        "artifacts:read" => "Read access to artifacts",
        "artifacts:write" => "Write access to artifacts",
        "tools:read" => "Read access to tools",
        "tools:write" => "Write access to tools",
        "tools:execute" => "Execute tools",
        "organizations" => "Access to organization resources",
        "users:read" => "Read user information",
        "users:write" => "Modify user information",
        other => other,
    }
}
