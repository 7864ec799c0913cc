//! Shared setup for credential-service integration tests.
//!
//! Everything runs against the in-memory repository and a mock clock unless a
//! test says otherwise.

#![allow(dead_code)]

use async_trait::async_trait;
use credential_service::{
    config::{
        ApiKeyConfig, CredentialConfig, DatabaseConfig, Environment, JwtConfig, MagicLinkConfig,
        SessionConfig, SweepConfig,
    },
    models::{ApiKey, Session},
    services::{Cache, InMemoryCache, InMemoryRepository, MockClock, NoopCache},
    Caches, CredentialServices,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-with-32-bytes!!";

pub fn test_config() -> CredentialConfig {
    dotenvy::dotenv().ok();

    CredentialConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "credential-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: std::env::var("TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/credentials_test".to_string()),
            max_connections: 5,
            min_connections: 1,
        },
        redis: None,
        jwt: JwtConfig::with_secret(TEST_JWT_SECRET),
        session: SessionConfig::default(),
        api_key: ApiKeyConfig {
            last_used_timeout_ms: 500,
            ..ApiKeyConfig::default()
        },
        magic_link: MagicLinkConfig::default(),
        sweep: SweepConfig::default(),
    }
}

pub struct TestContext {
    pub services: CredentialServices,
    pub repository: Arc<InMemoryRepository>,
    pub clock: Arc<MockClock>,
}

pub fn setup() -> TestContext {
    setup_with_caches(Caches::none())
}

pub fn setup_with_caches(caches: Caches) -> TestContext {
    setup_with(test_config(), caches)
}

pub fn setup_with(config: CredentialConfig, caches: Caches) -> TestContext {
    let repository = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(MockClock::default());
    let services = CredentialServices::build(&config, repository.clone(), caches, clock.clone())
        .expect("Failed to build credential services");

    TestContext {
        services,
        repository,
        clock,
    }
}

/// Cache variants that must be interchangeable without changing outcomes.
pub fn cache_variants() -> Vec<(&'static str, Caches)> {
    vec![
        ("none", Caches::none()),
        (
            "noop",
            Caches {
                sessions: Some(Arc::new(NoopCache)),
                api_keys: Some(Arc::new(NoopCache)),
            },
        ),
        (
            "in_memory",
            Caches {
                sessions: Some(Arc::new(InMemoryCache::<Session>::new())),
                api_keys: Some(Arc::new(InMemoryCache::<ApiKey>::new())),
            },
        ),
        (
            "failing",
            Caches {
                sessions: Some(Arc::new(FailingCache)),
                api_keys: Some(Arc::new(FailingCache)),
            },
        ),
    ]
}

/// Cache whose every operation errors, as an unreachable Redis would.
pub struct FailingCache;

#[async_trait]
impl<V> Cache<V> for FailingCache
where
    V: Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> Result<Option<V>, anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn set(&self, _key: &str, _value: &V, _ttl: Duration) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn exists(&self, _key: &str) -> Result<bool, anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
