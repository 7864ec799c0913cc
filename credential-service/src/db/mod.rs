//! PostgreSQL pool setup and credential schema migrations.

use crate::config::DatabaseConfig;
use crate::services::{Database, ServiceError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Connect, migrate and wrap the pool in the repository backend.
pub async fn open(config: &DatabaseConfig) -> Result<Database, ServiceError> {
    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;
    Ok(Database::new(pool))
}

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, ServiceError> {
    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.url)
        .await?;

    Ok(pool)
}

/// Creates the sessions, api_keys and magic_link_tokens tables.
pub async fn run_migrations(pool: &PgPool) -> Result<(), ServiceError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| ServiceError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
    tracing::info!("Credential schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_open_creates_schema() {
        let config = DatabaseConfig {
            url: std::env::var("TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/credentials_test".to_string()),
            max_connections: 2,
            min_connections: 1,
        };

        let db = open(&config).await.unwrap();
        db.health_check().await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables WHERE table_schema = 'public'",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        for table in ["sessions", "api_keys", "magic_link_tokens"] {
            assert!(tables.iter().any(|t| t == table), "missing {}", table);
        }
    }
}
