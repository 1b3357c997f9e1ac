use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use webscour_core::error::CrawlError;
use webscour_core::queue::WorkQueue;
use webscour_core::task::{Delivery, QueueDepth};

/// PostgreSQL-backed named work queue.
///
/// Tasks are rows in `crawl_tasks`; a delivery is a row moved to `in_flight`
/// with `SELECT FOR UPDATE SKIP LOCKED`, so competing consumers never claim
/// the same task. The row id is the delivery tag.
#[derive(Clone)]
pub struct PgTaskQueue {
    pool: Pool<Postgres>,
    name: String,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool, name: &str) -> Self {
        Self {
            pool,
            name: name.to_string(),
        }
    }

    /// Return in-flight tasks delivered more than `lease` ago to pending.
    ///
    /// Covers consumers that died without settling or releasing their
    /// delivery. Returns the number of reclaimed tasks.
    pub async fn reclaim_expired(&self, lease: Duration) -> Result<u64, CrawlError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET status = 'pending', consumer = NULL, delivered_at = NULL
            WHERE queue_name = $1
              AND status = 'in_flight'
              AND delivered_at < NOW() - make_interval(secs => $2)
            "#,
        )
        .bind(&self.name)
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            tracing::warn!(queue = %self.name, reclaimed, "Reclaimed expired deliveries");
        }
        Ok(reclaimed)
    }

    /// URLs of the next pending tasks in delivery order.
    pub async fn pending_urls(&self, limit: usize) -> Result<Vec<String>, CrawlError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT url FROM crawl_tasks
            WHERE queue_name = $1 AND status = 'pending'
            ORDER BY available_at, id
            LIMIT $2
            "#,
        )
        .bind(&self.name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(queue_error)?;

        Ok(rows.into_iter().map(|(url,)| url).collect())
    }
}

fn queue_error(e: sqlx::Error) -> CrawlError {
    CrawlError::QueueError(e.to_string())
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: i64,
    url: String,
    attempt: i32,
    deliveries: i32,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Delivery {
            tag: row.id,
            url: row.url,
            attempt: row.attempt.max(0) as u32,
            redelivered: row.deliveries > 1,
        }
    }
}

impl WorkQueue for PgTaskQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn declare(&self) -> Result<(), CrawlError> {
        sqlx::query(r#"INSERT INTO crawl_queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING"#)
            .bind(&self.name)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;

        Ok(())
    }

    async fn purge(&self) -> Result<u64, CrawlError> {
        let result =
            sqlx::query(r#"DELETE FROM crawl_tasks WHERE queue_name = $1 AND status = 'pending'"#)
                .bind(&self.name)
                .execute(&self.pool)
                .await
                .map_err(queue_error)?;

        Ok(result.rows_affected())
    }

    async fn publish(&self, url: &str) -> Result<(), CrawlError> {
        sqlx::query(r#"INSERT INTO crawl_tasks (queue_name, url) VALUES ($1, $2)"#)
            .bind(&self.name)
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;

        Ok(())
    }

    async fn receive(&self, consumer: &str) -> Result<Option<Delivery>, CrawlError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            UPDATE crawl_tasks
            SET status = 'in_flight', consumer = $2, delivered_at = NOW(),
                deliveries = deliveries + 1
            WHERE id = (
                SELECT id FROM crawl_tasks
                WHERE queue_name = $1
                  AND status = 'pending'
                  AND available_at <= NOW()
                  AND NOT EXISTS (
                      SELECT 1 FROM crawl_tasks held
                      WHERE held.queue_name = $1
                        AND held.status = 'in_flight'
                        AND held.consumer = $2
                  )
                ORDER BY available_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, url, attempt, deliveries
            "#,
        )
        .bind(&self.name)
        .bind(consumer)
        .fetch_optional(&self.pool)
        .await
        .map_err(queue_error)?;

        Ok(row.map(Into::into))
    }

    async fn ack(&self, tag: i64) -> Result<(), CrawlError> {
        let result = sqlx::query(
            r#"DELETE FROM crawl_tasks WHERE id = $1 AND queue_name = $2 AND status = 'in_flight'"#,
        )
        .bind(tag)
        .bind(&self.name)
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        if result.rows_affected() == 0 {
            return Err(CrawlError::QueueError(format!(
                "unknown delivery tag {tag} on queue {}",
                self.name
            )));
        }
        Ok(())
    }

    async fn requeue(&self, tag: i64, available_at: DateTime<Utc>) -> Result<(), CrawlError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET status = 'pending', consumer = NULL, delivered_at = NULL,
                attempt = attempt + 1, available_at = $3
            WHERE id = $1 AND queue_name = $2 AND status = 'in_flight'
            "#,
        )
        .bind(tag)
        .bind(&self.name)
        .bind(available_at)
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        if result.rows_affected() == 0 {
            return Err(CrawlError::QueueError(format!(
                "unknown delivery tag {tag} on queue {}",
                self.name
            )));
        }
        Ok(())
    }

    async fn release_consumer(&self, consumer: &str) -> Result<u64, CrawlError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_tasks
            SET status = 'pending', consumer = NULL, delivered_at = NULL
            WHERE queue_name = $1 AND consumer = $2 AND status = 'in_flight'
            "#,
        )
        .bind(&self.name)
        .bind(consumer)
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        Ok(result.rows_affected())
    }

    async fn depth(&self) -> Result<QueueDepth, CrawlError> {
        let (pending, in_flight): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'in_flight')
            FROM crawl_tasks
            WHERE queue_name = $1
            "#,
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await
        .map_err(queue_error)?;

        Ok(QueueDepth {
            pending: pending.max(0) as u64,
            in_flight: in_flight.max(0) as u64,
        })
    }
}
