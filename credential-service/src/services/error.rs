use service_core::error::AppError;
use thiserror::Error;

/// Coarse classification used for status mapping, logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCredentialFormat,
    InvalidCredential,
    CredentialExpired,
    CredentialAlreadyUsed,
    RateLimitExceeded,
    InsufficientScope,
    NotFound,
    Unauthorized,
    InvalidRequest,
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCredentialFormat => "invalid_format",
            ErrorKind::InvalidCredential => "invalid",
            ErrorKind::CredentialExpired => "expired",
            ErrorKind::CredentialAlreadyUsed => "already_used",
            ErrorKind::RateLimitExceeded => "rate_limited",
            ErrorKind::InsufficientScope => "insufficient_scope",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Refresh token does not belong to this session")]
    SessionMismatch,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid API key format")]
    InvalidApiKeyFormat,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API key expired")]
    ApiKeyExpired,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Insufficient scopes")]
    InsufficientScopes,

    #[error("Unauthorized organization")]
    UnauthorizedOrganization,

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    #[error("Invalid OTP code")]
    InvalidOtp,

    #[error("Token already used")]
    TokenAlreadyUsed,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Database(_)
            | ServiceError::Internal(_)
            | ServiceError::Configuration(_) => ErrorKind::Infrastructure,
            ServiceError::Validation(_) => ErrorKind::InvalidRequest,
            ServiceError::InvalidApiKeyFormat => ErrorKind::InvalidCredentialFormat,
            ServiceError::InvalidToken
            | ServiceError::SessionMismatch
            | ServiceError::InvalidApiKey
            | ServiceError::InvalidOtp => ErrorKind::InvalidCredential,
            ServiceError::TokenExpired
            | ServiceError::SessionExpired
            | ServiceError::ApiKeyExpired => ErrorKind::CredentialExpired,
            ServiceError::TokenAlreadyUsed => ErrorKind::CredentialAlreadyUsed,
            ServiceError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            ServiceError::InsufficientScopes => ErrorKind::InsufficientScope,
            ServiceError::SessionNotFound | ServiceError::TokenNotFound => ErrorKind::NotFound,
            ServiceError::UnauthorizedOrganization => ErrorKind::Unauthorized,
        }
    }

    /// True for failures that say nothing about the credential itself.
    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Database(anyhow::Error::new(err))
    }
}

/// Collapse credential failures into generic responses so callers cannot tell
/// "expired" from "forged" from "not found". Rate limiting is the exception.
impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let kind = err.kind();
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Configuration(e) => AppError::ConfigError(anyhow::anyhow!(e)),
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::RateLimitExceeded { retry_after_secs } => AppError::TooManyRequests(
                "Rate limit exceeded. Please try again later.".to_string(),
                retry_after_secs,
            ),
            ServiceError::InsufficientScopes | ServiceError::UnauthorizedOrganization => {
                tracing::debug!(kind = kind.as_str(), "Credential rejected: forbidden");
                AppError::Forbidden(anyhow::anyhow!("Forbidden"))
            }
            other => {
                tracing::debug!(kind = kind.as_str(), error = %other, "Credential rejected");
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::http::StatusCode;

    #[test]
    fn test_credential_failures_are_indistinguishable() {
        let errors = [
            ServiceError::InvalidToken,
            ServiceError::TokenExpired,
            ServiceError::SessionNotFound,
            ServiceError::SessionExpired,
            ServiceError::InvalidApiKeyFormat,
            ServiceError::InvalidApiKey,
            ServiceError::ApiKeyExpired,
            ServiceError::TokenAlreadyUsed,
            ServiceError::InvalidOtp,
        ];

        let messages: Vec<String> = errors
            .into_iter()
            .map(|e| {
                let app: AppError = e.into();
                assert_eq!(app.status_code(), StatusCode::UNAUTHORIZED);
                app.to_string()
            })
            .collect();

        assert!(messages.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_rate_limit_is_surfaced() {
        let app: AppError = ServiceError::RateLimitExceeded {
            retry_after_secs: Some(30),
        }
        .into();
        assert_eq!(app.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_infrastructure_is_not_a_credential_failure() {
        let err = ServiceError::Database(anyhow::anyhow!("connection reset"));
        assert!(err.is_infrastructure());
        let app: AppError = err.into();
        assert_eq!(app.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_scope_and_tenant_failures_are_forbidden() {
        for err in [
            ServiceError::InsufficientScopes,
            ServiceError::UnauthorizedOrganization,
        ] {
            let app: AppError = err.into();
            assert_eq!(app.status_code(), StatusCode::FORBIDDEN);
        }
    }
}
