//! Credential and session lifecycle.
//!
//! Signed access/refresh tokens, server-side sessions, API keys and
//! single-use magic links, over a pluggable repository and optional cache.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::config::CredentialConfig;
use crate::models::{ApiKey, Session};
use crate::services::{
    ApiKeyRepository, ApiTokenStore, Cache, Clock, CredentialMetrics, MagicLinkRepository,
    MagicLinkStore, RedisCache, ServiceError, SessionRepository, SessionStore, TokenManager,
};

/// Optional caches for the cached stores. Magic links are never cached.
#[derive(Clone, Default)]
pub struct Caches {
    pub sessions: Option<Arc<dyn Cache<Session>>>,
    pub api_keys: Option<Arc<dyn Cache<ApiKey>>>,
}

impl Caches {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn redis(manager: ::redis::aio::ConnectionManager) -> Self {
        Self {
            sessions: Some(Arc::new(RedisCache::<Session>::new(
                manager.clone(),
                "session",
            ))),
            api_keys: Some(Arc::new(RedisCache::<ApiKey>::new(manager, "api_key"))),
        }
    }
}

/// Every store wired to one repository, one clock and one metrics registry.
#[derive(Clone)]
pub struct CredentialServices {
    pub tokens: Arc<TokenManager>,
    pub sessions: SessionStore,
    pub api_tokens: ApiTokenStore,
    pub magic_links: MagicLinkStore,
    pub metrics: Arc<CredentialMetrics>,
}

/// Rows removed by one sweep. A failed sweep of one kind counts as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub api_keys: u64,
    pub magic_links: u64,
    pub failures: usize,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.sessions + self.api_keys + self.magic_links
    }
}

impl CredentialServices {
    /// Must be called inside a Tokio runtime.
    pub fn build<R>(
        config: &CredentialConfig,
        repository: Arc<R>,
        caches: Caches,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError>
    where
        R: SessionRepository + ApiKeyRepository + MagicLinkRepository + 'static,
    {
        let metrics = Arc::new(CredentialMetrics::new().map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Failed to register metrics: {}", e))
        })?);

        let tokens = Arc::new(TokenManager::new(&config.jwt, clock.clone())?);
        let sessions = SessionStore::new(
            repository.clone(),
            caches.sessions,
            &config.session,
            clock.clone(),
            metrics.clone(),
        );
        let api_tokens = ApiTokenStore::new(
            repository.clone(),
            caches.api_keys,
            &config.api_key,
            clock.clone(),
            metrics.clone(),
        );
        let magic_links =
            MagicLinkStore::new(repository, &config.magic_link, clock, metrics.clone());

        Ok(Self {
            tokens,
            sessions,
            api_tokens,
            magic_links,
            metrics,
        })
    }

    /// Delete every expired session, API key and magic link.
    pub async fn sweep_expired(&self) -> SweepReport {
        let mut failures = 0;
        let sessions = tally("sessions", self.sessions.cleanup_expired().await, &mut failures);
        let api_keys = tally("api_keys", self.api_tokens.cleanup_expired().await, &mut failures);
        let magic_links = tally(
            "magic_links",
            self.magic_links.cleanup_expired().await,
            &mut failures,
        );
        SweepReport {
            sessions,
            api_keys,
            magic_links,
            failures,
        }
    }
}

fn tally(kind: &str, result: Result<u64, ServiceError>, failures: &mut usize) -> u64 {
    match result {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(kind, error = %e, "Expiry sweep failed");
            *failures += 1;
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeyConfig, JwtConfig, MagicLinkConfig, SessionConfig, SweepConfig};
    use crate::config::{DatabaseConfig, Environment};
    use crate::models::{DeliveryMethod, SessionMetadata};
    use crate::services::{InMemoryRepository, MockClock};
    use chrono::Duration;
    use uuid::Uuid;

    fn config() -> CredentialConfig {
        CredentialConfig {
            common: service_core::config::Config::default(),
            environment: Environment::Dev,
            service_name: "credential-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/credentials".to_string(),
                max_connections: 2,
                min_connections: 1,
            },
            redis: None,
            jwt: JwtConfig::with_secret("a-test-secret-that-is-long-enough-000"),
            session: SessionConfig::default(),
            api_key: ApiKeyConfig::default(),
            magic_link: MagicLinkConfig::default(),
            sweep: SweepConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_sweep_counts_each_kind() {
        let repo = Arc::new(InMemoryRepository::new());
        let clock = Arc::new(MockClock::default());
        let services =
            CredentialServices::build(&config(), repo.clone(), Caches::none(), clock.clone())
                .unwrap();

        let user_id = Uuid::new_v4();
        services
            .sessions
            .create(user_id, SessionMetadata::default())
            .await
            .unwrap();
        services
            .api_tokens
            .create_token(user_id, Uuid::new_v4(), "ci", vec![], Duration::days(1))
            .await
            .unwrap();
        services
            .magic_links
            .create_token("u@x.com", DeliveryMethod::Email, None, "", "")
            .await
            .unwrap();

        clock.advance(Duration::days(31));
        let report = services.sweep_expired().await;

        assert_eq!(
            report,
            SweepReport {
                sessions: 1,
                api_keys: 1,
                magic_links: 1,
                failures: 0,
            }
        );
        assert_eq!(report.total(), 3);
        assert_eq!(repo.session_count(), 0);
    }

    #[tokio::test]
    async fn test_build_rejects_empty_jwt_secret() {
        let mut config = config();
        config.jwt = JwtConfig::default();
        let result = CredentialServices::build(
            &config,
            Arc::new(InMemoryRepository::new()),
            Caches::none(),
            Arc::new(MockClock::default()),
        );
        assert!(result.is_err());
    }
}
