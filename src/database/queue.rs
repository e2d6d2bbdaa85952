//! PostgreSQL-backed durable queue
//!
//! Messages are rows in `broker_messages`. A consumer leases the oldest
//! visible row with `FOR UPDATE SKIP LOCKED`, so competing consumers never
//! receive the same message concurrently. Settlement is guarded by a lease
//! token: once a lease times out and another consumer takes the row, the
//! stale holder's ack is a no-op and the message is processed again
//! (at-least-once).

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::queue::{Acker, Consumer, Delivery, OutboundMessage, QueueProvider};
use crate::error::Result;

/// Durable queue provider over PostgreSQL
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool, poll_interval: Duration, visibility_timeout: Duration) -> Self {
        PgQueue {
            pool,
            poll_interval,
            visibility_timeout,
        }
    }

    /// Messages waiting or in flight on `queue`
    pub async fn depth(&self, queue: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM broker_messages WHERE queue = $1")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl QueueProvider for PgQueue {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()> {
        sqlx::query("INSERT INTO broker_messages (queue, route_key, body) VALUES ($1, $2, $3)")
            .bind(queue)
            .bind(&message.route_key)
            .bind(&message.body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(PgConsumer {
            pool: self.pool.clone(),
            queue: queue.to_string(),
            poll_interval: self.poll_interval,
            visibility_timeout: self.visibility_timeout,
        }))
    }

    async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

struct PgConsumer {
    pool: PgPool,
    queue: String,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl PgConsumer {
    async fn lease(&self) -> Result<Option<Delivery>> {
        let token = Uuid::new_v4();
        let row: Option<(i64, Option<String>, Vec<u8>, i32)> = sqlx::query_as(r#"
            UPDATE broker_messages
            SET leased_until = NOW() + make_interval(secs => $2),
                lease_token = $3,
                deliveries = deliveries + 1
            WHERE id = (
                SELECT id FROM broker_messages
                WHERE queue = $1
                  AND visible_at <= NOW()
                  AND (leased_until IS NULL OR leased_until <= NOW())
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, route_key, body, deliveries
        "#)
        .bind(&self.queue)
        .bind(self.visibility_timeout.as_secs_f64())
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, route_key, body, deliveries)| {
            debug!(queue = %self.queue, message_id = id, deliveries, "leased message");
            Delivery::new(
                body,
                route_key,
                deliveries.max(0) as u32,
                Box::new(PgAcker {
                    pool: self.pool.clone(),
                    id,
                    token,
                }),
            )
        }))
    }
}

#[async_trait]
impl Consumer for PgConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.lease().await? {
                return Ok(Some(delivery));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

struct PgAcker {
    pool: PgPool,
    id: i64,
    token: Uuid,
}

impl PgAcker {
    async fn delete(&self) -> Result<()> {
        let done = sqlx::query("DELETE FROM broker_messages WHERE id = $1 AND lease_token = $2")
            .bind(self.id)
            .bind(self.token)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            warn!(message_id = self.id, "lease lost before settlement");
        }
        Ok(())
    }
}

#[async_trait]
impl Acker for PgAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.delete().await
    }

    async fn requeue(self: Box<Self>, body: Vec<u8>, delay: Duration) -> Result<()> {
        sqlx::query(r#"
            UPDATE broker_messages
            SET body = $3,
                visible_at = NOW() + make_interval(secs => $4),
                leased_until = NULL,
                lease_token = NULL
            WHERE id = $1 AND lease_token = $2
        "#)
        .bind(self.id)
        .bind(self.token)
        .bind(body)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<()> {
        self.delete().await
    }
}
