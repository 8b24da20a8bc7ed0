//! `PostgreSQL`-backed [`PaymentStore`].

use crate::{map_sqlx_error, sql_limit};
use chrono::{DateTime, Utc};
use payment_saga_core::payment::{
    PaymentId, PaymentMethod, PaymentRecord, PaymentStatus, RefundMetadata, SessionRef, Transition,
};
use payment_saga_core::store::{CasOutcome, PaymentStore, StoreError};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

const COLUMNS: &str = "id, order_id, customer_id, restaurant_id, amount_cents, currency, \
    payment_method, status, transaction_id, gateway_session_ref, gateway_payment_ref, \
    refund, failure_reason, created_at, updated_at";

/// Payment records in the `payments` table.
///
/// Transitions read the current row, apply the transition in memory, and
/// write it back with `WHERE id = $1 AND status = $expected`. When another
/// writer got there first the update matches zero rows and the caller gets
/// [`CasOutcome::Conflict`] with the row as it now stands.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the bundled migrations (`payments`, `order_confirmations`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch(&self, id: &PaymentId) -> Result<Option<PaymentRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM payments WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert_record(&self, record: PaymentRecord) -> Result<PaymentRecord, StoreError> {
        sqlx::query(
            r"
            INSERT INTO payments (
                id, order_id, customer_id, restaurant_id, amount_cents, currency,
                payment_method, status, transaction_id, gateway_session_ref,
                gateway_payment_ref, refund, failure_reason, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(record.id.as_str())
        .bind(record.order_id.as_str())
        .bind(record.customer_id.as_str())
        .bind(record.restaurant_id.as_str())
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.payment_method.as_str())
        .bind(record.status.as_str())
        .bind(record.transaction_id.as_str())
        .bind(record.gateway_session_ref.as_ref().map(SessionRef::as_str))
        .bind(record.gateway_payment_ref.as_ref().map(|r| r.as_str().to_string()))
        .bind(refund_json(record.refund.as_ref())?)
        .bind(record.failure_reason.as_deref())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        tracing::debug!(payment_id = %record.id, order_id = %record.order_id, "Payment record inserted");
        Ok(record)
    }

    async fn transition_record(
        &self,
        id: &PaymentId,
        transition: Transition,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let current = self
            .fetch(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if current.status != transition.expected_status() {
            return Ok(CasOutcome::Conflict(current));
        }
        let mut next = current.clone();
        if next.apply(&transition, at).is_err() {
            return Ok(CasOutcome::Conflict(current));
        }

        let row = sqlx::query(&format!(
            r"
            UPDATE payments
            SET status = $3,
                gateway_payment_ref = $4,
                refund = $5,
                failure_reason = $6,
                updated_at = $7
            WHERE id = $1
              AND status = $2
              AND gateway_payment_ref IS NOT DISTINCT FROM $8
            RETURNING {COLUMNS}
            "
        ))
        .bind(id.as_str())
        .bind(current.status.as_str())
        .bind(next.status.as_str())
        .bind(next.gateway_payment_ref.as_ref().map(|r| r.as_str().to_string()))
        .bind(refund_json(next.refund.as_ref())?)
        .bind(next.failure_reason.as_deref())
        .bind(next.updated_at)
        .bind(current.gateway_payment_ref.as_ref().map(|r| r.as_str().to_string()))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = row {
            return Ok(CasOutcome::Applied(row_to_record(&row)?));
        }

        tracing::debug!(payment_id = %id, expected = %current.status, "Payment transition lost race");
        let latest = self
            .fetch(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(CasOutcome::Conflict(latest))
    }
}

impl PaymentStore for PostgresPaymentStore {
    fn insert(
        &self,
        record: PaymentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentRecord, StoreError>> + Send + '_>> {
        Box::pin(self.insert_record(record))
    }

    fn get(
        &self,
        id: &PaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentRecord>, StoreError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move { self.fetch(&id).await })
    }

    fn find_by_session(
        &self,
        session_ref: &SessionRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentRecord>, StoreError>> + Send + '_>> {
        let session_ref = session_ref.clone();
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {COLUMNS} FROM payments WHERE gateway_session_ref = $1"
            ))
            .bind(session_ref.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            row.as_ref().map(row_to_record).transpose()
        })
    }

    fn transition(
        &self,
        id: &PaymentId,
        transition: Transition,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome, StoreError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move { self.transition_record(&id, transition, at).await })
    }

    fn list_by_status(
        &self,
        status: PaymentStatus,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaymentRecord>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                r"
                SELECT {COLUMNS}
                FROM payments
                WHERE status = $1 AND updated_at >= $2
                ORDER BY updated_at ASC
                LIMIT $3
                "
            ))
            .bind(status.as_str())
            .bind(since)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter().map(row_to_record).collect()
        })
    }

    fn list_unconfirmed(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaymentRecord>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                r"
                SELECT {COLUMNS}
                FROM payments p
                WHERE status = $1 AND updated_at >= $2
                  AND NOT EXISTS (
                      SELECT 1 FROM order_confirmations c WHERE c.payment_id = p.id
                  )
                ORDER BY updated_at ASC
                LIMIT $3
                "
            ))
            .bind(PaymentStatus::Succeeded.as_str())
            .bind(since)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter().map(row_to_record).collect()
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
    }
}

fn refund_json(refund: Option<&RefundMetadata>) -> Result<Option<serde_json::Value>, StoreError> {
    refund
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| StoreError::DatabaseError(format!("Failed to encode refund: {e}")))
}

fn row_to_record(row: &PgRow) -> Result<PaymentRecord, StoreError> {
    let refund: Option<serde_json::Value> = row.get("refund");
    let refund = refund
        .map(serde_json::from_value::<RefundMetadata>)
        .transpose()
        .map_err(|e| StoreError::DatabaseError(format!("Invalid refund metadata: {e}")))?;

    let status: String = row.get("status");
    let method: String = row.get("payment_method");

    Ok(PaymentRecord {
        id: PaymentId::from(row.get::<String, _>("id")),
        order_id: row.get::<String, _>("order_id").into(),
        customer_id: row.get::<String, _>("customer_id").into(),
        restaurant_id: row.get::<String, _>("restaurant_id").into(),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        payment_method: PaymentMethod::parse(&method)
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?,
        status: PaymentStatus::parse(&status)
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?,
        transaction_id: row.get::<String, _>("transaction_id").into(),
        gateway_session_ref: row
            .get::<Option<String>, _>("gateway_session_ref")
            .map(Into::into),
        gateway_payment_ref: row
            .get::<Option<String>, _>("gateway_payment_ref")
            .map(Into::into),
        refund,
        failure_reason: row.get("failure_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
