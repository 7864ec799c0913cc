use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::models::ApiKeyEnvironment;

const MIN_PROD_JWT_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    /// `None` runs every store without a cache.
    pub redis: Option<RedisConfig>,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub api_key: ApiKeyConfig,
    pub magic_link: MagicLinkConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

impl JwtConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            ..Default::default()
        }
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::minutes(self.access_token_expiry_minutes)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::days(self.refresh_token_expiry_days)
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: SecretString::new(String::new()),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_days: i64,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::days(self.ttl_days)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_days: 30 }
    }
}

#[derive(Debug, Clone)]
pub struct ApiKeyConfig {
    pub environment: ApiKeyEnvironment,
    /// Requests per minute for keys issued without an explicit limit.
    pub default_rate_limit: i32,
    pub last_used_queue_capacity: usize,
    pub last_used_timeout_ms: u64,
}

impl ApiKeyConfig {
    pub fn last_used_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.last_used_timeout_ms)
    }
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            environment: ApiKeyEnvironment::Test,
            default_rate_limit: 100,
            last_used_queue_capacity: 1024,
            last_used_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MagicLinkConfig {
    pub ttl_minutes: i64,
    pub rate_limit_per_hour: i64,
}

impl MagicLinkConfig {
    pub fn ttl(&self) -> Duration {
        Duration::minutes(self.ttl_minutes)
    }
}

impl Default for MagicLinkConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 15,
            rate_limit_per_hour: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval_seconds: u64,
}

impl SweepConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
        }
    }
}

impl CredentialConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let default_key_env = if is_prod { "live" } else { "test" };

        let config = CredentialConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("credential-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            redis: get_optional_env("REDIS_URL").map(|url| RedisConfig { url }),
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("60"),
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("30"),
                    is_prod,
                )?,
            },
            session: SessionConfig {
                ttl_days: parse_env("SESSION_TTL_DAYS", Some("30"), is_prod)?,
            },
            api_key: ApiKeyConfig {
                environment: get_env("API_KEY_ENVIRONMENT", Some(default_key_env), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                default_rate_limit: parse_env("API_KEY_DEFAULT_RATE_LIMIT", Some("100"), is_prod)?,
                last_used_queue_capacity: parse_env(
                    "API_KEY_LAST_USED_QUEUE",
                    Some("1024"),
                    is_prod,
                )?,
                last_used_timeout_ms: parse_env(
                    "API_KEY_LAST_USED_TIMEOUT_MS",
                    Some("2000"),
                    is_prod,
                )?,
            },
            magic_link: MagicLinkConfig {
                ttl_minutes: parse_env("MAGIC_LINK_TTL_MINUTES", Some("15"), is_prod)?,
                rate_limit_per_hour: parse_env(
                    "MAGIC_LINK_RATE_LIMIT_PER_HOUR",
                    Some("5"),
                    is_prod,
                )?,
            },
            sweep: SweepConfig {
                interval_seconds: parse_env("SWEEP_INTERVAL_SECONDS", Some("300"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let positive = [
            (
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                self.jwt.access_token_expiry_minutes,
            ),
            (
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                self.jwt.refresh_token_expiry_days,
            ),
            ("SESSION_TTL_DAYS", self.session.ttl_days),
            (
                "API_KEY_DEFAULT_RATE_LIMIT",
                i64::from(self.api_key.default_rate_limit),
            ),
            ("MAGIC_LINK_TTL_MINUTES", self.magic_link.ttl_minutes),
            (
                "MAGIC_LINK_RATE_LIMIT_PER_HOUR",
                self.magic_link.rate_limit_per_hour,
            ),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be positive",
                    name
                )));
            }
        }

        if self.api_key.last_used_queue_capacity == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "API_KEY_LAST_USED_QUEUE must be positive"
            )));
        }

        if self.api_key.last_used_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "API_KEY_LAST_USED_TIMEOUT_MS must be positive"
            )));
        }

        if self.sweep.interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SWEEP_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.jwt.secret.expose_secret().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod {
            if self.jwt.secret.expose_secret().len() < MIN_PROD_JWT_SECRET_BYTES {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be at least {} bytes in production",
                    MIN_PROD_JWT_SECRET_BYTES
                )));
            }

            if self.api_key.environment == ApiKeyEnvironment::Test {
                tracing::warn!("API keys are issued with the test environment prefix in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
