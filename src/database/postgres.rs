//! PostgreSQL database connection and schema

use crate::config::PostgresConfig;
use crate::error::{Error, Result};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// PostgreSQL connection pool type alias
pub type PostgresPool = PgPool;

/// Initialize the PostgreSQL connection pool
pub async fn init_pool(config: &PostgresConfig) -> Result<PostgresPool> {
    info!("Initializing PostgreSQL connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(config.url.expose_secret())
        .await?;

    verify_database(&pool).await?;

    info!("PostgreSQL connection pool initialized successfully");
    Ok(pool)
}

/// Verify the connection works
async fn verify_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(Error::Database)?;
    Ok(())
}

/// Database migrations
pub mod migrations {
    use super::*;

    /// Create the broker tables if they do not exist
    pub async fn run(pool: &PgPool) -> Result<()> {
        info!("Running database migrations");

        // Queue messages; a row is leased by one consumer at a time
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS broker_messages (
                id BIGSERIAL PRIMARY KEY,
                queue TEXT NOT NULL,
                route_key TEXT,
                body BYTEA NOT NULL,
                visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                leased_until TIMESTAMPTZ,
                lease_token UUID,
                deliveries INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#)
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_broker_messages_ready ON broker_messages(queue, visible_at, id)"
        )
        .execute(pool)
        .await?;

        // Versioned key/value entries with expiry
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS broker_registry (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                version BIGINT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
        "#)
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_broker_registry_expires ON broker_registry(expires_at)"
        )
        .execute(pool)
        .await?;

        // Versions come from one sequence so they are never reused
        sqlx::query("CREATE SEQUENCE IF NOT EXISTS broker_registry_version_seq")
            .execute(pool)
            .await?;

        info!("Database migrations completed");
        Ok(())
    }
}
