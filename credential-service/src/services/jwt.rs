use chrono::Duration;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::ServiceError;
use crate::config::JwtConfig;

/// The only accepted signing algorithm.
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Identity context supplied by the caller (e.g. from an OAuth provider) and
/// embedded in access tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub email: String,
    pub name: String,
    pub picture: String,
    pub provider: String,
    pub provider_id: String,
    pub organization_name: String,
    pub organization_role: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub scopes: Vec<String>,
}

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    #[serde(rename = "uid")]
    pub user_id: Uuid,
    #[serde(rename = "sid")]
    pub session_id: Uuid,
    pub token_type: TokenType,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub avatar_url: String,
    #[serde(rename = "org_id", default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    #[serde(rename = "org_name", default, skip_serializing_if = "String::is_empty")]
    pub organization_name: String,
    #[serde(rename = "org_role", default, skip_serializing_if = "String::is_empty")]
    pub organization_role: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider_id: String,
}

/// Minimal refresh token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    #[serde(rename = "uid")]
    pub user_id: Uuid,
    #[serde(rename = "sid")]
    pub session_id: Uuid,
    pub token_type: TokenType,
    #[serde(rename = "org_id", default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
}

/// Token response returned to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

trait TimeBounded {
    fn expires_at(&self) -> i64;
    fn not_before(&self) -> i64;
    fn token_type(&self) -> TokenType;
}

impl TimeBounded for EnhancedClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
    fn not_before(&self) -> i64 {
        self.nbf
    }
    fn token_type(&self) -> TokenType {
        self.token_type
    }
}

impl TimeBounded for RefreshClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
    fn not_before(&self) -> i64 {
        self.nbf
    }
    fn token_type(&self) -> TokenType {
        self.token_type
    }
}

/// Issues and validates stateless HS256 access and refresh tokens.
///
/// There is no revocation list. An access token stays valid until it expires
/// even if its session is deleted, so keep the access TTL short.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenManager {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>) -> Result<Self, ServiceError> {
        let secret = config.secret.expose_secret();
        if secret.is_empty() {
            return Err(ServiceError::Configuration(
                "JWT secret must not be empty".to_string(),
            ));
        }
        if config.access_token_expiry_minutes <= 0 || config.refresh_token_expiry_days <= 0 {
            return Err(ServiceError::Configuration(
                "JWT token lifetimes must be positive".to_string(),
            ));
        }

        tracing::info!("Token manager initialized with HS256");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_ttl: config.access_token_ttl(),
            refresh_token_ttl: config.refresh_token_ttl(),
            clock,
        })
    }

    /// Access token expiry in seconds, as reported in `TokenPair::expires_in`.
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_ttl.num_seconds()
    }

    pub fn generate_token_pair(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        organization_id: Option<Uuid>,
        claims: Option<&TokenClaims>,
    ) -> Result<TokenPair, ServiceError> {
        let access_token =
            self.generate_access_token(user_id, session_id, organization_id, claims)?;
        let refresh_token = self.generate_refresh_token(user_id, session_id, organization_id)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        })
    }

    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        organization_id: Option<Uuid>,
        claims: Option<&TokenClaims>,
    ) -> Result<String, ServiceError> {
        let now = self.clock.now();
        let exp = now + self.access_token_ttl;
        let context = claims.cloned().unwrap_or_default();

        let claims = EnhancedClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            user_id,
            session_id,
            token_type: TokenType::Access,
            email: context.email,
            name: context.name,
            avatar_url: context.picture,
            organization_id,
            organization_name: context.organization_name,
            organization_role: context.organization_role,
            roles: context.roles,
            permissions: context.permissions,
            scopes: context.scopes,
            provider: context.provider,
            provider_id: context.provider_id,
        };

        self.sign(&claims, "access")
    }

    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<String, ServiceError> {
        let now = self.clock.now();
        let exp = now + self.refresh_token_ttl;

        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            user_id,
            session_id,
            token_type: TokenType::Refresh,
            organization_id,
        };

        self.sign(&claims, "refresh")
    }

    /// Validate an access token.
    pub fn validate_token(&self, token: &str) -> Result<EnhancedClaims, ServiceError> {
        self.verify::<EnhancedClaims>(token, TokenType::Access)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, ServiceError> {
        self.verify::<RefreshClaims>(token, TokenType::Refresh)
    }

    /// Mint a new access token for the session the refresh token was issued to.
    ///
    /// The refresh token itself is returned unchanged (no rotation).
    pub fn refresh_token_pair(
        &self,
        refresh_token: &str,
        session_id: Uuid,
        claims: Option<&TokenClaims>,
    ) -> Result<TokenPair, ServiceError> {
        let refresh_claims = self.validate_refresh_token(refresh_token)?;

        if refresh_claims.session_id != session_id {
            tracing::warn!(
                user_id = %refresh_claims.user_id,
                session_id = %session_id,
                "Refresh token presented for a different session"
            );
            return Err(ServiceError::SessionMismatch);
        }

        let access_token = self.generate_access_token(
            refresh_claims.user_id,
            session_id,
            refresh_claims.organization_id,
            claims,
        )?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh_token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        })
    }

    /// Read the user id from a token WITHOUT verifying its signature or expiry.
    ///
    /// Only for logging and metrics. Never use the result for an authorization
    /// decision; anyone can forge it.
    pub fn get_user_id_from_token(&self, token: &str) -> Result<Uuid, ServiceError> {
        #[derive(Deserialize)]
        struct UnverifiedSubject {
            uid: Option<Uuid>,
            sub: Option<String>,
        }

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<UnverifiedSubject>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|_| ServiceError::InvalidToken)?;

        match (data.claims.uid, data.claims.sub) {
            (Some(uid), _) => Ok(uid),
            (None, Some(sub)) => Uuid::parse_str(&sub).map_err(|_| ServiceError::InvalidToken),
            (None, None) => Err(ServiceError::InvalidToken),
        }
    }

    fn sign<T: Serialize>(&self, claims: &T, kind: &str) -> Result<String, ServiceError> {
        encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {} token: {}", kind, e).into())
    }

    fn verify<T>(&self, token: &str, expected: TokenType) -> Result<T, ServiceError>
    where
        T: DeserializeOwned + TimeBounded,
    {
        let header = decode_header(token).map_err(|_| ServiceError::InvalidToken)?;
        if header.alg != SIGNING_ALGORITHM {
            tracing::warn!(alg = ?header.alg, "Rejected token with unexpected signing algorithm");
            return Err(ServiceError::InvalidToken);
        }

        // Time checks run against the injected clock below.
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

        let claims = decode::<T>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token failed verification");
                ServiceError::InvalidToken
            })?
            .claims;

        if claims.token_type() != expected {
            tracing::debug!(
                expected = ?expected,
                actual = ?claims.token_type(),
                "Token type mismatch"
            );
            return Err(ServiceError::InvalidToken);
        }

        let now = self.clock.now().timestamp();
        if now > claims.expires_at() {
            return Err(ServiceError::TokenExpired);
        }
        if now < claims.not_before() {
            return Err(ServiceError::InvalidToken);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::MockClock;
    use chrono::Utc;

    fn manager() -> (TokenManager, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let manager = TokenManager::new(
            &JwtConfig::with_secret("test-secret-with-enough-bytes-000"),
            clock.clone(),
        )
        .expect("token manager");
        (manager, clock)
    }

    #[test]
    fn test_rejects_empty_secret() {
        let result = TokenManager::new(&JwtConfig::default(), Arc::new(MockClock::default()));
        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }

    #[test]
    fn test_token_pair_generation_and_validation() {
        let (manager, _) = manager();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();
        let context = TokenClaims {
            email: "test@example.com".to_string(),
            roles: vec!["member".to_string()],
            ..Default::default()
        };

        let pair = manager
            .generate_token_pair(user_id, session_id, Some(org_id), Some(&context))
            .unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 3600);

        let claims = manager.validate_token(&pair.access_token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.session_id, session_id);
        assert_eq!(claims.organization_id, Some(org_id));
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.roles, vec!["member".to_string()]);

        let refresh = manager.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(refresh.session_id, session_id);
    }

    #[test]
    fn test_each_token_has_unique_jti() {
        let (manager, _) = manager();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        let a = manager
            .generate_access_token(user_id, session_id, None, None)
            .unwrap();
        let b = manager
            .generate_access_token(user_id, session_id, None, None)
            .unwrap();

        let a = manager.validate_token(&a).unwrap();
        let b = manager.validate_token(&b).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let (manager, _) = manager();
        let pair = manager
            .generate_token_pair(Uuid::new_v4(), Uuid::new_v4(), None, None)
            .unwrap();

        assert!(matches!(
            manager.validate_token(&pair.refresh_token),
            Err(ServiceError::InvalidToken)
        ));
        assert!(matches!(
            manager.validate_refresh_token(&pair.access_token),
            Err(ServiceError::InvalidToken)
        ));
    }

    #[test]
    fn test_expiry_uses_injected_clock() {
        let (manager, clock) = manager();
        let token = manager
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), None, None)
            .unwrap();

        clock.advance(Duration::minutes(60));
        assert!(manager.validate_token(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            manager.validate_token(&token),
            Err(ServiceError::TokenExpired)
        ));
    }

    #[test]
    fn test_not_before_is_enforced() {
        let (manager, clock) = manager();
        let token = manager
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), None, None)
            .unwrap();

        clock.advance(Duration::minutes(-5));
        assert!(matches!(
            manager.validate_token(&token),
            Err(ServiceError::InvalidToken)
        ));
    }

    #[test]
    fn test_rejects_other_algorithms_even_with_same_secret() {
        let (manager, clock) = manager();
        let now = clock.now();
        let claims = EnhancedClaims {
            sub: Uuid::new_v4().to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
            nbf: now.timestamp(),
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            token_type: TokenType::Access,
            email: String::new(),
            name: String::new(),
            avatar_url: String::new(),
            organization_id: None,
            organization_name: String::new(),
            organization_role: String::new(),
            roles: vec![],
            permissions: vec![],
            scopes: vec![],
            provider: String::new(),
            provider_id: String::new(),
        };

        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"test-secret-with-enough-bytes-000"),
        )
        .unwrap();

        assert!(matches!(
            manager.validate_token(&token),
            Err(ServiceError::InvalidToken)
        ));
    }

    #[test]
    fn test_rejects_forged_signature() {
        let (manager, clock) = manager();
        let other = TokenManager::new(&JwtConfig::with_secret("another-secret"), clock).unwrap();
        let token = other
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), None, None)
            .unwrap();

        assert!(matches!(
            manager.validate_token(&token),
            Err(ServiceError::InvalidToken)
        ));
        assert!(matches!(
            manager.validate_token("not.a.jwt"),
            Err(ServiceError::InvalidToken)
        ));
    }

    #[test]
    fn test_refresh_reuses_refresh_token_and_keeps_org() {
        let (manager, _) = manager();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();
        let pair = manager
            .generate_token_pair(user_id, session_id, Some(org_id), None)
            .unwrap();

        let refreshed = manager
            .refresh_token_pair(&pair.refresh_token, session_id, None)
            .unwrap();

        assert_eq!(refreshed.refresh_token, pair.refresh_token);
        let claims = manager.validate_token(&refreshed.access_token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.organization_id, Some(org_id));
    }

    #[test]
    fn test_refresh_rejects_other_session() {
        let (manager, _) = manager();
        let pair = manager
            .generate_token_pair(Uuid::new_v4(), Uuid::new_v4(), None, None)
            .unwrap();

        assert!(matches!(
            manager.refresh_token_pair(&pair.refresh_token, Uuid::new_v4(), None),
            Err(ServiceError::SessionMismatch)
        ));
    }

    #[test]
    fn test_get_user_id_does_not_verify() {
        let (manager, clock) = manager();
        let user_id = Uuid::new_v4();
        let other = TokenManager::new(&JwtConfig::with_secret("another-secret"), clock).unwrap();
        let token = other
            .generate_access_token(user_id, Uuid::new_v4(), None, None)
            .unwrap();

        assert_eq!(manager.get_user_id_from_token(&token).unwrap(), user_id);
        assert!(manager.get_user_id_from_token("garbage").is_err());
    }
}
