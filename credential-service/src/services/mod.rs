//! Credential lifecycle services.
//!
//! Stores own the rules; repositories own persistence; caches are optional
//! and never authoritative.

pub mod api_token_store;
pub mod cache;
pub mod cache_aside;
pub mod clock;
mod database;
pub mod error;
pub mod jwt;
mod last_used;
pub mod magic_link_store;
mod memory;
pub mod metrics;
mod rate_limit;
pub mod redis;
pub mod repository;
pub mod session_store;

pub use api_token_store::{
    extract_api_key_from_headers, parse_api_key, scope_description, validate_api_key_format,
    validate_scopes, ApiTokenStore,
};
pub use cache::{Cache, InMemoryCache, NoopCache};
pub use clock::{Clock, MockClock, SystemClock};
pub use database::Database;
pub use error::{ErrorKind, ServiceError};
pub use jwt::{EnhancedClaims, RefreshClaims, TokenClaims, TokenManager, TokenPair, TokenType};
pub use last_used::LastUsedTracker;
pub use magic_link_store::MagicLinkStore;
pub use memory::InMemoryRepository;
pub use metrics::CredentialMetrics;
pub use rate_limit::ApiKeyRateLimiter;
pub use redis::RedisCache;
pub use repository::{ApiKeyRepository, MagicLinkRepository, SessionRepository};
pub use session_store::SessionStore;
