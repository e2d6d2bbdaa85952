//! PostgreSQL-backed registry store
//!
//! Each key is one row in `broker_registry`. Conditional writes are single
//! statements, so compare-and-set is atomic per key. Expired rows are
//! ignored on read and may be overwritten by an absent-only claim.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::time::Duration;

use crate::core::store::{RegistryStore, Versioned};
use crate::error::Result;

/// Registry store over PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    /// Delete expired rows
    pub async fn purge_expired(&self) -> Result<u64> {
        let done = sqlx::query("DELETE FROM broker_registry WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl RegistryStore for PgStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT value, version FROM broker_registry WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value, version)| Versioned {
            value,
            version: version as u64,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<u64> {
        let (version,): (i64,) = sqlx::query_as(r#"
            INSERT INTO broker_registry (key, value, version, expires_at)
            VALUES ($1, $2, nextval('broker_registry_version_seq'), NOW() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                version = EXCLUDED.version,
                expires_at = EXCLUDED.expires_at
            RETURNING version
        "#)
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .fetch_one(&self.pool)
        .await?;
        Ok(version as u64)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
        ttl: Duration,
    ) -> Result<Option<u64>> {
        let row: Option<(i64,)> = match expected {
            // Absent-only: insert, or overwrite a row that has already expired
            None => {
                sqlx::query_as(r#"
                    INSERT INTO broker_registry (key, value, version, expires_at)
                    VALUES ($1, $2, nextval('broker_registry_version_seq'), NOW() + make_interval(secs => $3))
                    ON CONFLICT (key) DO UPDATE SET
                        value = EXCLUDED.value,
                        version = EXCLUDED.version,
                        expires_at = EXCLUDED.expires_at
                    WHERE broker_registry.expires_at <= NOW()
                    RETURNING version
                "#)
                .bind(key)
                .bind(value)
                .bind(ttl.as_secs_f64())
                .fetch_optional(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query_as(r#"
                    UPDATE broker_registry
                    SET value = $2,
                        version = nextval('broker_registry_version_seq'),
                        expires_at = NOW() + make_interval(secs => $3)
                    WHERE key = $1 AND version = $4 AND expires_at > NOW()
                    RETURNING version
                "#)
                .bind(key)
                .bind(value)
                .bind(ttl.as_secs_f64())
                .bind(version as i64)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row.map(|(v,)| v as u64))
    }

    async fn expire(&self, key: &str) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "DELETE FROM broker_registry WHERE key = $1 RETURNING expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some_and(|(live,)| live))
    }

    async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
