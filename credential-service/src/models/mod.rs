pub mod api_key;
pub mod magic_link;
pub mod session;

pub use api_key::{ApiKey, ApiKeyEnvironment, ApiToken, ApiTokenResponse};
pub use magic_link::{DeliveryMethod, MagicLinkToken};
pub use session::{Session, SessionMetadata, SessionUpdate};
