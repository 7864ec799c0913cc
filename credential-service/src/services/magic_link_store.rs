use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::ServiceError;
use super::metrics::CredentialMetrics;
use super::repository::MagicLinkRepository;
use crate::config::MagicLinkConfig;
use crate::models::{DeliveryMethod, MagicLinkToken};
use crate::utils::tokens::{generate_otp_code, generate_secret, hash_secret};

/// Window over which token creation is counted per identifier.
const RATE_LIMIT_WINDOW_HOURS: i64 = 1;

/// Single-use passwordless tokens and OTP codes. Deliberately uncached.
#[derive(Clone)]
pub struct MagicLinkStore {
    repository: Arc<dyn MagicLinkRepository>,
    ttl: Duration,
    rate_limit_per_hour: i64,
    clock: Arc<dyn Clock>,
    metrics: Arc<CredentialMetrics>,
}

impl MagicLinkStore {
    pub fn new(
        repository: Arc<dyn MagicLinkRepository>,
        config: &MagicLinkConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<CredentialMetrics>,
    ) -> Self {
        Self {
            repository,
            ttl: config.ttl(),
            rate_limit_per_hour: config.rate_limit_per_hour,
            clock,
            metrics,
        }
    }

    /// Issue a token for `identifier`.
    ///
    /// The returned value carries the plaintext link secret in `token`; it is
    /// not stored anywhere and cannot be recovered later.
    pub async fn create_token(
        &self,
        identifier: &str,
        delivery_method: DeliveryMethod,
        user_id: Option<Uuid>,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<MagicLinkToken, ServiceError> {
        if identifier.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Identifier must not be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let since = now - Duration::hours(RATE_LIMIT_WINDOW_HOURS);
        let recent = self
            .repository
            .count_magic_links_since(identifier, since)
            .await?;
        if recent >= self.rate_limit_per_hour {
            return Err(self.rate_limited(delivery_method, recent));
        }

        let secret = generate_secret();
        let code = match delivery_method {
            DeliveryMethod::Otp => Some(generate_otp_code()),
            _ => None,
        };

        let mut token = MagicLinkToken::new(
            identifier.to_string(),
            delivery_method,
            user_id,
            hash_secret(&secret),
            code,
            ip_address.to_string(),
            user_agent.to_string(),
            now,
            self.ttl,
        );

        // The count above rejects early; this insert is the authoritative check
        // when several requests for one identifier race.
        if !self
            .repository
            .create_magic_link(&token, since, self.rate_limit_per_hour)
            .await?
        {
            return Err(self.rate_limited(delivery_method, recent));
        }
        token.token = Some(secret);

        tracing::info!(
            token_id = %token.id,
            delivery_method = delivery_method.as_str(),
            "Magic link token created"
        );
        Ok(token)
    }

    /// Verify and consume a link token.
    pub async fn verify_token(&self, token: &str) -> Result<MagicLinkToken, ServiceError> {
        let result = async {
            let found = self
                .repository
                .get_magic_link_by_hash(&hash_secret(token))
                .await?
                .ok_or(ServiceError::InvalidToken)?;
            self.consume(found).await
        }
        .await;
        self.record("magic_link", &result);
        result
    }

    /// Verify and consume a six-digit OTP code issued to `identifier`.
    pub async fn verify_otp(
        &self,
        identifier: &str,
        code: &str,
    ) -> Result<MagicLinkToken, ServiceError> {
        let result = async {
            if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ServiceError::InvalidOtp);
            }
            let found = self
                .repository
                .get_magic_link_by_code(identifier, code)
                .await?
                .ok_or(ServiceError::InvalidOtp)?;
            self.consume(found).await
        }
        .await;
        self.record("otp", &result);
        result
    }

    pub async fn cleanup_expired(&self) -> Result<u64, ServiceError> {
        let deleted = self
            .repository
            .delete_expired_magic_links(self.clock.now())
            .await?;
        if deleted > 0 {
            tracing::info!(count = deleted, "Expired magic link tokens removed");
        }
        Ok(deleted)
    }

    /// Used before expired, so a used-and-expired token reports "already
    /// used". The final write is conditional; losing a race counts as used.
    async fn consume(&self, mut token: MagicLinkToken) -> Result<MagicLinkToken, ServiceError> {
        if token.is_used() {
            return Err(ServiceError::TokenAlreadyUsed);
        }

        let now = self.clock.now();
        if token.is_expired_at(now) {
            return Err(ServiceError::TokenExpired);
        }

        if !self.repository.mark_magic_link_used(token.id, now).await? {
            tracing::warn!(token_id = %token.id, "Magic link consumed concurrently");
            return Err(ServiceError::TokenAlreadyUsed);
        }

        token.used_at = Some(now);
        token.updated_at = now;
        Ok(token)
    }

    fn rate_limited(&self, delivery_method: DeliveryMethod, recent: i64) -> ServiceError {
        tracing::warn!(
            delivery_method = delivery_method.as_str(),
            recent,
            "Magic link rate limit exceeded"
        );
        ServiceError::RateLimitExceeded {
            retry_after_secs: None,
        }
    }

    fn record(&self, credential: &str, result: &Result<MagicLinkToken, ServiceError>) {
        match result {
            Ok(token) => {
                tracing::info!(token_id = %token.id, "Magic link verified");
                self.metrics.record_validation(credential, "ok");
            }
            Err(e) => {
                tracing::debug!(kind = e.kind().as_str(), "Magic link rejected");
                self.metrics.record_validation(credential, e.kind().as_str());
            }
        }
    }
}
