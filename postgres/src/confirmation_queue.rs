//! Order-confirmation jobs in `PostgreSQL`.
//!
//! Jobs live in `order_confirmations`, one row per payment. A job is due when
//! it is `pending` and `next_attempt_at <= now`. Claiming a job pushes
//! `next_attempt_at` out to the lease deadline in the same statement, so a
//! worker that dies mid-attempt only delays the job by one lease.

use crate::{map_sqlx_error, sql_limit};
use chrono::{DateTime, Utc};
use payment_saga_core::confirmation::{
    ConfirmationJob, ConfirmationQueue, ConfirmationStatus, Enqueued, JobId,
};
use payment_saga_core::payment::{OrderId, PaymentId};
use payment_saga_core::store::StoreError;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

const COLUMNS: &str =
    "id, payment_id, order_id, attempts, status, next_attempt_at, last_error, created_at, updated_at";

/// `PostgreSQL`-based confirmation queue.
///
/// # Example
///
/// ```no_run
/// use payment_saga_core::ConfirmationQueue;
/// use payment_saga_postgres::PostgresConfirmationQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = PostgresConfirmationQueue::new(pool);
///
/// // Jobs that ran out of attempts
/// let escalated = queue.list_escalated(100).await?;
/// println!("Orders needing attention: {}", escalated.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresConfirmationQueue {
    pool: PgPool,
}

impl PostgresConfirmationQueue {
    /// Create a queue on the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Count jobs still waiting to be confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM order_confirmations WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(count)
    }

    async fn enqueue_job(
        &self,
        payment_id: &PaymentId,
        order_id: &OrderId,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Result<Enqueued, StoreError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        // `xmax = 0` only holds for a row this statement inserted.
        let row = sqlx::query(&format!(
            r"
            INSERT INTO order_confirmations (
                payment_id, order_id, attempts, status, next_attempt_at, created_at, updated_at
            ) VALUES ($1, $2, 0, 'pending', $3, $4, $4)
            ON CONFLICT (payment_id) DO UPDATE SET payment_id = EXCLUDED.payment_id
            RETURNING {COLUMNS}, (xmax = 0) AS inserted
            "
        ))
        .bind(payment_id.as_str())
        .bind(order_id.as_str())
        .bind(not_before)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let job = row_to_job(&row)?;
        let created: bool = row.get("inserted");
        tracing::debug!(job_id = job.id, payment_id = %payment_id, created, "Confirmation job enqueued");
        Ok(Enqueued { job, created })
    }

    async fn claim(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConfirmationJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            UPDATE order_confirmations
            SET next_attempt_at = $2
            WHERE id IN (
                SELECT id
                FROM order_confirmations
                WHERE status = 'pending' AND next_attempt_at <= $1
                ORDER BY next_attempt_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "
        ))
        .bind(now)
        .bind(lease_until)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn update_job(
        &self,
        id: JobId,
        status: ConfirmationStatus,
        error: Option<&str>,
        next_attempt_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<ConfirmationJob, StoreError> {
        let row = sqlx::query(&format!(
            r"
            UPDATE order_confirmations
            SET attempts = attempts + 1,
                status = $2,
                last_error = $3,
                next_attempt_at = COALESCE($4, next_attempt_at),
                updated_at = $5
            WHERE id = $1
            RETURNING {COLUMNS}
            "
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .bind(next_attempt_at)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::DatabaseError(format!("confirmation job {id} not found")))?;

        row_to_job(&row)
    }

    async fn list(&self, status: ConfirmationStatus, limit: usize) -> Result<Vec<ConfirmationJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {COLUMNS}
            FROM order_confirmations
            WHERE status = $1
            ORDER BY updated_at DESC
            LIMIT $2
            "
        ))
        .bind(status.as_str())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(row_to_job).collect()
    }
}

impl ConfirmationQueue for PostgresConfirmationQueue {
    fn enqueue(
        &self,
        payment_id: &PaymentId,
        order_id: &OrderId,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Enqueued, StoreError>> + Send + '_>> {
        let payment_id = payment_id.clone();
        let order_id = order_id.clone();
        Box::pin(async move { self.enqueue_job(&payment_id, &order_id, now, not_before).await })
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConfirmationJob>, StoreError>> + Send + '_>> {
        Box::pin(self.claim(now, lease_until, limit))
    }

    fn mark_confirmed(
        &self,
        id: JobId,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.update_job(id, ConfirmationStatus::Confirmed, None, None, at)
                .await?;
            metrics::counter!("payment_saga.confirmation.db.confirmed").increment(1);
            Ok(())
        })
    }

    fn record_failure(
        &self,
        id: JobId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationJob, StoreError>> + Send + '_>> {
        let error = error.to_string();
        Box::pin(async move {
            self.update_job(
                id,
                ConfirmationStatus::Pending,
                Some(&error),
                Some(next_attempt_at),
                at,
            )
            .await
        })
    }

    fn escalate(
        &self,
        id: JobId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationJob, StoreError>> + Send + '_>> {
        let error = error.to_string();
        Box::pin(async move {
            let job = self
                .update_job(id, ConfirmationStatus::Escalated, Some(&error), None, at)
                .await?;
            tracing::warn!(
                job_id = id,
                payment_id = %job.payment_id,
                order_id = %job.order_id,
                attempts = job.attempts,
                error = %error,
                "Confirmation job escalated"
            );
            Ok(job)
        })
    }

    fn find_by_payment(
        &self,
        payment_id: &PaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ConfirmationJob>, StoreError>> + Send + '_>> {
        let payment_id = payment_id.clone();
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {COLUMNS} FROM order_confirmations WHERE payment_id = $1"
            ))
            .bind(payment_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            row.as_ref().map(row_to_job).transpose()
        })
    }

    fn list_escalated(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConfirmationJob>, StoreError>> + Send + '_>> {
        Box::pin(self.list(ConfirmationStatus::Escalated, limit))
    }
}

/// Convert a database row to a `ConfirmationJob`.
fn row_to_job(row: &PgRow) -> Result<ConfirmationJob, StoreError> {
    let status: String = row.get("status");
    let attempts: i32 = row.get("attempts");

    Ok(ConfirmationJob {
        id: row.get("id"),
        payment_id: row.get::<String, _>("payment_id").into(),
        order_id: row.get::<String, _>("order_id").into(),
        attempts: u32::try_from(attempts).unwrap_or(0),
        status: ConfirmationStatus::parse(&status)?,
        next_attempt_at: row.get("next_attempt_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn confirmation_status_roundtrip() {
        for status in &[
            ConfirmationStatus::Pending,
            ConfirmationStatus::Confirmed,
            ConfirmationStatus::Escalated,
        ] {
            let parsed = ConfirmationStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn confirmation_status_invalid() {
        assert!(ConfirmationStatus::parse("processing").is_err());
    }
}
