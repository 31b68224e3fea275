use crate::error::{AppError, Result};
use crate::models::{BodyRecord, IdempotencyRecord, IdempotencyStatus};
use crate::observability::{get_metrics, LatencyTimer};
use crate::store::IdempotencyStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// PostgreSQL-based idempotency storage.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Deletes resolved records (and, by cascade, their bodies) whose last
    /// update is older than `cutoff`. In-progress records are never purged.
    pub async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let timer = LatencyTimer::new();
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE status IN ($1, $2) AND updated_at < $3
            "#,
        )
        .bind(IdempotencyStatus::Success)
        .bind(IdempotencyStatus::Failed)
        .bind(cutoff)
        .execute(&self.pool)
        .await;

        get_metrics().record_db_query("purge_resolved", timer.elapsed_ms(), result.is_ok());
        Ok(result.map_err(AppError::Database)?.rows_affected())
    }

    /// Counts records by status.
    pub async fn count_by_status(&self, status: IdempotencyStatus) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM idempotency_records WHERE status = $1
            "#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.0)
    }

    /// Lists every body for a record, newest first.
    pub async fn bodies_for(&self, idempotent_id: i64) -> Result<Vec<BodyRecord>> {
        let rows = sqlx::query_as::<_, BodyRecord>(
            r#"
            SELECT id, idempotent_id, request_param, response_body, created_at
            FROM idempotency_bodies
            WHERE idempotent_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(idempotent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn insert(&self, record: &IdempotencyRecord) -> Result<Option<i64>> {
        let timer = LatencyTimer::new();
        let row: std::result::Result<(i64,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO idempotency_records (request_id, app_code, business_no, business_type, request_desc, business_desc, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&record.request_id)
        .bind(&record.app_code)
        .bind(&record.business_no)
        .bind(&record.business_type)
        .bind(&record.request_desc)
        .bind(&record.business_desc)
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await;

        get_metrics().record_db_query("insert_record", timer.elapsed_ms(), row.is_ok());
        let (id,) = row.map_err(AppError::Database)?;
        Ok(Some(id))
    }

    async fn insert_body(&self, body: &BodyRecord) -> Result<()> {
        let timer = LatencyTimer::new();
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_bodies (idempotent_id, request_param, response_body, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(body.idempotent_id)
        .bind(&body.request_param)
        .bind(&body.response_body)
        .bind(body.created_at)
        .execute(&self.pool)
        .await;

        get_metrics().record_db_query("insert_body", timer.elapsed_ms(), result.is_ok());
        result.map_err(AppError::Database)?;
        Ok(())
    }

    async fn update_status(&self, record: &IdempotencyRecord) -> Result<()> {
        let id = record.id.ok_or_else(|| {
            AppError::StoreInconsistency(format!(
                "cannot update status of unsaved record {}:{}",
                record.request_id, record.app_code
            ))
        })?;

        let timer = LatencyTimer::new();
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(record.status)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        get_metrics().record_db_query("update_status", timer.elapsed_ms(), result.is_ok());
        if result.map_err(AppError::Database)?.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Idempotency record {} not found", id)));
        }

        Ok(())
    }

    async fn query_by_key(&self, request_id: &str, app_code: &str) -> Result<Option<IdempotencyRecord>> {
        let timer = LatencyTimer::new();
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT id, request_id, app_code, business_no, business_type, request_desc, business_desc, status, created_at, updated_at
            FROM idempotency_records
            WHERE request_id = $1 AND app_code = $2
            "#,
        )
        .bind(request_id)
        .bind(app_code)
        .fetch_optional(&self.pool)
        .await;

        get_metrics().record_db_query("query_by_key", timer.elapsed_ms(), record.is_ok());
        record.map_err(AppError::Database)
    }

    async fn latest_body(&self, idempotent_id: i64) -> Result<Option<BodyRecord>> {
        let timer = LatencyTimer::new();
        let body = sqlx::query_as::<_, BodyRecord>(
            r#"
            SELECT id, idempotent_id, request_param, response_body, created_at
            FROM idempotency_bodies
            WHERE idempotent_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(idempotent_id)
        .fetch_optional(&self.pool)
        .await;

        get_metrics().record_db_query("latest_body", timer.elapsed_ms(), body.is_ok());
        body.map_err(AppError::Database)
    }
}
