mod common;

use chrono::Duration;
use credential_service::{
    config::ApiKeyConfig,
    models::ApiKeyEnvironment,
    services::{extract_api_key_from_headers, validate_api_key_format, ApiKeyRepository, ServiceError},
    Caches,
};
use http::{HeaderMap, HeaderValue};
use uuid::Uuid;

fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_created_key_has_expected_shape() {
    let ctx = common::setup();
    let created = ctx
        .services
        .api_tokens
        .create_token(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "deploy bot",
            scopes(&["pipelines:read"]),
            Duration::days(90),
        )
        .await
        .unwrap();

    assert!(created.key.starts_with("sk_test_"));
    assert_eq!(created.key.len(), "sk_test_".len() + 64);
    assert!(validate_api_key_format(&created.key));
    assert_eq!(created.prefix, "sk_test_");
    assert_eq!(created.rate_limit, 100);

    let stored = ctx
        .repository
        .get_api_key(created.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(stored.key_hash, created.key);
    assert!(!stored.key_hash.contains(&created.key));
}

#[tokio::test]
async fn test_live_environment_prefix() {
    let mut config = common::test_config();
    config.api_key = ApiKeyConfig {
        environment: ApiKeyEnvironment::Live,
        ..ApiKeyConfig::default()
    };
    let ctx = common::setup_with(config, Caches::none());

    let created = ctx
        .services
        .api_tokens
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "prod", vec![], Duration::days(1))
        .await
        .unwrap();
    assert!(created.key.starts_with("sk_live_"));
    assert_eq!(ctx.services.api_tokens.environment(), ApiKeyEnvironment::Live);
}

#[tokio::test]
async fn test_validate_then_revoke() {
    let ctx = common::setup();
    let store = &ctx.services.api_tokens;
    let created = store
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "ci", vec![], Duration::days(1))
        .await
        .unwrap();

    let token = store.validate_token(&created.key).await.unwrap();
    assert_eq!(token.id, created.id);

    store.revoke_token(created.id).await.unwrap();
    assert!(matches!(
        store.validate_token(&created.key).await,
        Err(ServiceError::InvalidApiKey)
    ));
    assert!(matches!(
        store.revoke_token(created.id).await,
        Err(ServiceError::TokenNotFound)
    ));
}

#[tokio::test]
async fn test_malformed_keys_fail_before_lookup() {
    let ctx = common::setup();
    for key in [
        "",
        "sk_test_short",
        "sk_prod_0000000000000000000000000000000000000000000000000000000000000000",
        "pk_test_0000000000000000000000000000000000000000000000000000000000000000",
        "sk_test_000000000000000000000000000000000000000000000000000000000000000G",
    ] {
        assert!(matches!(
            ctx.services.api_tokens.validate_token(key).await,
            Err(ServiceError::InvalidApiKeyFormat)
        ));
    }
    assert_eq!(
        ctx.services
            .metrics
            .validation_count("api_key", "invalid_format"),
        5
    );
}

#[tokio::test]
async fn test_well_formed_unknown_key_is_invalid() {
    let ctx = common::setup();
    let key = format!("sk_test_{}", "ab".repeat(32));
    assert!(matches!(
        ctx.services.api_tokens.validate_token(&key).await,
        Err(ServiceError::InvalidApiKey)
    ));
}

#[tokio::test]
async fn test_expired_key_is_rejected() {
    let ctx = common::setup();
    let created = ctx
        .services
        .api_tokens
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "short", vec![], Duration::hours(1))
        .await
        .unwrap();

    ctx.clock.advance(Duration::hours(1) + Duration::seconds(1));
    assert!(matches!(
        ctx.services.api_tokens.validate_token(&created.key).await,
        Err(ServiceError::ApiKeyExpired)
    ));
}

#[tokio::test]
async fn test_last_used_is_recorded_in_background() {
    let ctx = common::setup();
    let created = ctx
        .services
        .api_tokens
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "ci", vec![], Duration::days(1))
        .await
        .unwrap();

    ctx.services
        .api_tokens
        .validate_token(&created.key)
        .await
        .unwrap();

    let repository = ctx.repository.clone();
    let key_id = created.id;
    let recorded = common::eventually(|| {
        let repository = repository.clone();
        async move {
            matches!(
                repository.get_api_key(key_id).await,
                Ok(Some(key)) if key.last_used_at.is_some()
            )
        }
    })
    .await;
    assert!(recorded, "last_used_at was never written");
}

#[tokio::test]
async fn test_scope_checks() {
    let ctx = common::setup();
    let store = &ctx.services.api_tokens;
    let created = store
        .create_token(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "reader",
            scopes(&["pipelines", "artifacts:read"]),
            Duration::days(1),
        )
        .await
        .unwrap();

    assert!(store
        .validate_token_with_scopes(&created.key, &["pipelines:execute", "artifacts:read"])
        .await
        .is_ok());
    assert!(matches!(
        store
            .validate_token_with_scopes(&created.key, &["artifacts:write"])
            .await,
        Err(ServiceError::InsufficientScopes)
    ));
}

#[tokio::test]
async fn test_organization_binding() {
    let ctx = common::setup();
    let org = Uuid::new_v4();
    let created = ctx
        .services
        .api_tokens
        .create_token(Uuid::new_v4(), org, "ci", vec![], Duration::days(1))
        .await
        .unwrap();

    assert!(ctx
        .services
        .api_tokens
        .validate_token_for_organization(&created.key, org)
        .await
        .is_ok());
    assert!(matches!(
        ctx.services
            .api_tokens
            .validate_token_for_organization(&created.key, Uuid::new_v4())
            .await,
        Err(ServiceError::UnauthorizedOrganization)
    ));
}

#[tokio::test]
async fn test_rate_limit_per_key() {
    let mut config = common::test_config();
    config.api_key.default_rate_limit = 2;
    let ctx = common::setup_with(config, Caches::none());
    let store = &ctx.services.api_tokens;

    let created = store
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "ci", vec![], Duration::days(1))
        .await
        .unwrap();
    let token = store.validate_token(&created.key).await.unwrap();

    assert!(store.check_rate_limit(&token).is_ok());
    assert!(store.check_rate_limit(&token).is_ok());
    assert!(matches!(
        store.check_rate_limit(&token),
        Err(ServiceError::RateLimitExceeded { .. })
    ));
}

#[tokio::test]
async fn test_revoke_user_tokens() {
    let ctx = common::setup();
    let store = &ctx.services.api_tokens;
    let user_id = Uuid::new_v4();

    let a = store
        .create_token(user_id, Uuid::new_v4(), "a", vec![], Duration::days(1))
        .await
        .unwrap();
    store
        .create_token(user_id, Uuid::new_v4(), "b", vec![], Duration::days(1))
        .await
        .unwrap();
    store
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "other", vec![], Duration::days(1))
        .await
        .unwrap();

    assert_eq!(store.list_tokens_by_user(user_id).await.unwrap().len(), 2);
    assert_eq!(store.revoke_user_tokens(user_id).await.unwrap(), 2);
    assert!(store.list_tokens_by_user(user_id).await.unwrap().is_empty());
    assert!(store.validate_token(&a.key).await.is_err());
    assert_eq!(ctx.repository.api_key_count(), 1);
}

#[tokio::test]
async fn test_invalid_create_requests() {
    let ctx = common::setup();
    let store = &ctx.services.api_tokens;

    assert!(matches!(
        store
            .create_token(Uuid::new_v4(), Uuid::new_v4(), " ", vec![], Duration::days(1))
            .await,
        Err(ServiceError::Validation(_))
    ));
    assert!(matches!(
        store
            .create_token(Uuid::new_v4(), Uuid::new_v4(), "x", vec![], Duration::zero())
            .await,
        Err(ServiceError::Validation(_))
    ));
    // Expiry past the largest representable timestamp.
    assert!(matches!(
        store
            .create_token(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "forever",
                vec![],
                Duration::days(365 * 300_000),
            )
            .await,
        Err(ServiceError::Validation(_))
    ));
    assert_eq!(ctx.repository.api_key_count(), 0);
}

#[tokio::test]
async fn test_cleanup_drops_rate_limiters_of_expired_keys() {
    let ctx = common::setup();
    let store = &ctx.services.api_tokens;

    let short = store
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "short", vec![], Duration::days(1))
        .await
        .unwrap();
    let long = store
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "long", vec![], Duration::days(30))
        .await
        .unwrap();
    for key in [&short.key, &long.key] {
        let token = store.validate_token(key).await.unwrap();
        store.check_rate_limit(&token).unwrap();
    }
    assert_eq!(store.rate_limiter_count(), 2);

    ctx.clock.advance(Duration::days(2));
    assert_eq!(store.cleanup_expired().await.unwrap(), 1);
    assert_eq!(store.rate_limiter_count(), 1);
}

#[tokio::test]
async fn test_list_scopes_for_token() {
    let ctx = common::setup();
    let store = &ctx.services.api_tokens;
    let created = store
        .create_token(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "reader",
            scopes(&["pipelines:read", "tools:execute"]),
            Duration::days(1),
        )
        .await
        .unwrap();

    assert_eq!(
        store.list_scopes_for_token(created.id).await.unwrap(),
        scopes(&["pipelines:read", "tools:execute"])
    );
    assert!(matches!(
        store.list_scopes_for_token(Uuid::new_v4()).await,
        Err(ServiceError::TokenNotFound)
    ));
}

#[tokio::test]
async fn test_key_from_headers_validates() {
    let ctx = common::setup();
    let created = ctx
        .services
        .api_tokens
        .create_token(Uuid::new_v4(), Uuid::new_v4(), "ci", vec![], Duration::days(1))
        .await
        .unwrap();

    let mut headers = HeaderMap::new();
    headers.insert(
        "x-api-key",
        HeaderValue::from_str(&created.key).unwrap(),
    );

    let key = extract_api_key_from_headers(&headers).unwrap();
    assert!(ctx.services.api_tokens.validate_token(&key).await.is_ok());
}
