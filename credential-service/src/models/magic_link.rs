//! Magic link model - single-use passwordless tokens and OTP codes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the secret reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Email,
    Console,
    Otp,
    Webhook,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Email => "email",
            DeliveryMethod::Console => "console",
            DeliveryMethod::Otp => "otp",
            DeliveryMethod::Webhook => "webhook",
        }
    }
}

impl std::str::FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(DeliveryMethod::Email),
            "console" => Ok(DeliveryMethod::Console),
            "otp" => Ok(DeliveryMethod::Otp),
            "webhook" => Ok(DeliveryMethod::Webhook),
            _ => Err(format!("Invalid delivery method: {}", s)),
        }
    }
}

/// Magic link token entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagicLinkToken {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    /// Plaintext link secret. Present only on the value returned from creation;
    /// never persisted or serialized.
    #[serde(skip)]
    pub token: Option<String>,
    pub token_hash: String,
    /// Six-digit code, only for OTP delivery.
    pub code: Option<String>,
    pub identifier: String,
    pub delivery_method: DeliveryMethod,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MagicLinkToken {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identifier: String,
        delivery_method: DeliveryMethod,
        user_id: Option<Uuid>,
        token_hash: String,
        code: Option<String>,
        ip_address: String,
        user_agent: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token: None,
            token_hash,
            code,
            identifier,
            delivery_method,
            expires_at: now + ttl,
            used_at: None,
            ip_address,
            user_agent,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
