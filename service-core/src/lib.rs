//! service-core: error taxonomy, base configuration and tracing setup shared
//! by the credential crates.
pub mod config;
pub mod error;
pub mod observability;

pub use axum;
