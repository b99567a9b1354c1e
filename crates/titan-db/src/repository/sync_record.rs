//! # Sync Record Repository
//!
//! The durable audit trail of every synchronization attempt, plus the retry
//! bookkeeping that lives on each row.
//!
//! ## Write Path of One Attempt
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  first attempt                     retry attempt                        │
//! │  ─────────────                     ─────────────                        │
//! │  create()                          begin_retry()                        │
//! │   INSERT status='pending'           UPDATE status='pending',            │
//! │          started_at=now                    retry_count += 1,            │
//! │       │                                    next_retry_at = NULL         │
//! │       ▼                                 │                               │
//! │  ┌──────────────────── reconciler runs ─┴──────────────────────┐        │
//! │  └──────────────────────────┬────────────────────────────────────┘       │
//! │                             ▼                                           │
//! │  finish(outcome, next_retry_at)                                         │
//! │   UPDATE status = success | partial | failed,                           │
//! │          items_*, failed_items, error_message, completed_at=now         │
//! │                                                                         │
//! │  A crash between the two leaves 'pending' → recover_interrupted()       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Eligibility (SQL form)
//! ```text
//! status IN ('failed','partial')
//!   AND retry_count < :max_retries
//!   AND (next_retry_at IS NULL OR next_retry_at <= :now)
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use titan_core::{
    AttemptOutcome, NewSyncRecord, SyncDirection, SyncPayload, SyncRecord, SyncStats,
    SyncStatus, SyncType,
};

const SELECT_COLUMNS: &str = r#"
    SELECT id, entity_type, entity_id, sync_type, sync_direction, status,
           items_processed, items_succeeded, items_failed,
           started_at, completed_at, last_synced_at,
           payload, failed_items, error_message,
           retry_count, next_retry_at,
           performed_by_id, performed_by_username, created_at
    FROM sync_records
"#;

/// Message stored on records recovered after a crash.
pub const INTERRUPTED_MESSAGE: &str = "interrupted";

// =============================================================================
// Row Mapping
// =============================================================================

/// Raw row. `payload` and `failed_items` are JSON text.
#[derive(Debug, sqlx::FromRow)]
struct SyncRecordRow {
    id: i64,
    entity_type: String,
    entity_id: String,
    sync_type: SyncType,
    sync_direction: SyncDirection,
    status: SyncStatus,
    items_processed: i64,
    items_succeeded: i64,
    items_failed: i64,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_synced_at: Option<DateTime<Utc>>,
    payload: String,
    failed_items: String,
    error_message: Option<String>,
    retry_count: i64,
    next_retry_at: Option<DateTime<Utc>>,
    performed_by_id: Option<String>,
    performed_by_username: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SyncRecordRow> for SyncRecord {
    type Error = DbError;

    fn try_from(row: SyncRecordRow) -> DbResult<Self> {
        let payload: SyncPayload =
            serde_json::from_str(&row.payload).map_err(|e| DbError::json("payload", e))?;
        let failed_items: Vec<String> = serde_json::from_str(&row.failed_items)
            .map_err(|e| DbError::json("failed_items", e))?;

        Ok(SyncRecord {
            id: row.id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            sync_type: row.sync_type,
            sync_direction: row.sync_direction,
            status: row.status,
            items_processed: row.items_processed,
            items_succeeded: row.items_succeeded,
            items_failed: row.items_failed,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_synced_at: row.last_synced_at,
            payload,
            failed_items,
            error_message: row.error_message,
            retry_count: row.retry_count,
            next_retry_at: row.next_retry_at,
            performed_by_id: row.performed_by_id,
            performed_by_username: row.performed_by_username,
            created_at: row.created_at,
        })
    }
}

fn into_records(rows: Vec<SyncRecordRow>) -> DbResult<Vec<SyncRecord>> {
    rows.into_iter().map(SyncRecord::try_from).collect()
}

// =============================================================================
// History Filter
// =============================================================================

/// Filter and page for `history`.
#[derive(Debug, Clone)]
pub struct HistoryFilter {
    pub limit: i64,
    pub offset: i64,
    pub sync_type: Option<SyncType>,
    pub status: Option<SyncStatus>,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        HistoryFilter {
            limit: 50,
            offset: 0,
            sync_type: None,
            status: None,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for `sync_records`.
#[derive(Debug, Clone)]
pub struct SyncRecordRepository {
    pool: SqlitePool,
}

impl SyncRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncRecordRepository { pool }
    }

    /// Inserts a new `pending` record and returns it with its assigned id.
    pub async fn create(&self, new: &NewSyncRecord) -> DbResult<SyncRecord> {
        let now = Utc::now();
        let payload =
            serde_json::to_string(&new.payload).map_err(|e| DbError::json("payload", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_records (
                entity_type, entity_id, sync_type, sync_direction, status,
                started_at, payload, failed_items,
                performed_by_id, performed_by_username, created_at
            ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, '[]', ?7, ?8, ?5)
            "#,
        )
        .bind(&new.entity_type)
        .bind(&new.entity_id)
        .bind(new.sync_type)
        .bind(new.sync_direction)
        .bind(now)
        .bind(payload)
        .bind(&new.context.user_id)
        .bind(&new.context.username)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            sync_id = id,
            entity_type = %new.entity_type,
            entity_id = %new.entity_id,
            sync_type = %new.sync_type,
            "Sync record created"
        );

        self.get(id).await
    }

    /// Gets a record by id, or `NotFound`.
    pub async fn get(&self, id: i64) -> DbResult<SyncRecord> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("SyncRecord", id))
    }

    pub async fn find(&self, id: i64) -> DbResult<Option<SyncRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row = sqlx::query_as::<_, SyncRecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SyncRecord::try_from).transpose()
    }

    /// Writes the terminal result of an attempt.
    ///
    /// `last_synced_at` moves only when the attempt raised the success count.
    /// `error_message` is kept only for failed/partial outcomes.
    pub async fn finish(
        &self,
        id: i64,
        outcome: &AttemptOutcome,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> DbResult<SyncRecord> {
        let now = Utc::now();
        let status = outcome.status();
        let failed_items = serde_json::to_string(&outcome.failed_items)
            .map_err(|e| DbError::json("failed_items", e))?;
        let error_message = if status.needs_retry() {
            outcome.error_message.clone()
        } else {
            None
        };
        let next_retry_at = if status.needs_retry() { next_retry_at } else { None };

        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                status = ?2,
                last_synced_at = CASE WHEN ?4 > items_succeeded THEN ?9 ELSE last_synced_at END,
                items_processed = ?3,
                items_succeeded = ?4,
                items_failed = ?5,
                failed_items = ?6,
                error_message = ?7,
                next_retry_at = ?8,
                completed_at = ?9
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(outcome.processed)
        .bind(outcome.succeeded)
        .bind(outcome.failed())
        .bind(failed_items)
        .bind(error_message)
        .bind(next_retry_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncRecord", id));
        }

        debug!(
            sync_id = id,
            status = %status,
            processed = outcome.processed,
            failed = outcome.failed(),
            "Sync record finished"
        );
        self.get(id).await
    }

    /// Puts a failed/partial record back into `pending` for a new attempt.
    ///
    /// Increments `retry_count` and clears the schedule. Returns `NotFound`
    /// if the record no longer exists or is not failed/partial.
    pub async fn begin_retry(&self, id: i64) -> DbResult<SyncRecord> {
        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                status = 'pending',
                retry_count = retry_count + 1,
                started_at = ?2,
                completed_at = NULL,
                next_retry_at = NULL
            WHERE id = ?1 AND status IN ('failed', 'partial')
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("retryable SyncRecord", id));
        }
        self.get(id).await
    }

    /// Marks records stuck in `pending` since before `started_before` as
    /// failed with message "interrupted". They are due for retry right away.
    pub async fn recover_interrupted(&self, started_before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                status = 'failed',
                items_failed = items_processed - items_succeeded,
                error_message = ?2,
                completed_at = ?3,
                next_retry_at = NULL
            WHERE status = 'pending' AND started_at < ?1
            "#,
        )
        .bind(started_before)
        .bind(INTERRUPTED_MESSAGE)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!(count, "Recovered interrupted sync records");
        }
        Ok(count)
    }

    /// Records whose retry is due, oldest first.
    pub async fn due_for_retry(&self, now: DateTime<Utc>, max_retries: i64) -> DbResult<Vec<SyncRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS}
            WHERE status IN ('failed', 'partial')
              AND retry_count < ?1
              AND (next_retry_at IS NULL OR next_retry_at <= ?2)
            ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, SyncRecordRow>(&sql)
            .bind(max_retries)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    /// Records in flight plus records still waiting for a retry.
    pub async fn pending_and_awaiting_retry(&self, max_retries: i64) -> DbResult<Vec<SyncRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS}
            WHERE status = 'pending'
               OR (status IN ('failed', 'partial') AND retry_count < ?1)
            ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, SyncRecordRow>(&sql)
            .bind(max_retries)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    /// Sets `retry_count = 0` and `next_retry_at = NULL` on every
    /// failed/partial record, optionally limited to one entity type.
    /// Status is left untouched.
    pub async fn reset_failed(&self, entity_type: Option<&str>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_records SET
                retry_count = 0,
                next_retry_at = NULL
            WHERE status IN ('failed', 'partial')
              AND (?1 IS NULL OR entity_type = ?1)
            "#,
        )
        .bind(entity_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes terminal records completed before `cutoff`. Never touches
    /// `pending` rows.
    pub async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_records
            WHERE status IN ('success', 'failed', 'partial')
              AND completed_at IS NOT NULL
              AND completed_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Newest-first history with optional type/status filters.
    pub async fn history(&self, filter: &HistoryFilter) -> DbResult<Vec<SyncRecord>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        builder.push(" WHERE 1 = 1");
        if let Some(sync_type) = filter.sync_type {
            builder.push(" AND sync_type = ").push_bind(sync_type);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = builder
            .build_query_as::<SyncRecordRow>()
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    /// Newest-first history of one entity.
    pub async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
    ) -> DbResult<Vec<SyncRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY id DESC LIMIT ?3"
        );
        let rows = sqlx::query_as::<_, SyncRecordRow>(&sql)
            .bind(entity_type)
            .bind(entity_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    /// Table-wide counters.
    pub async fn stats(&self, max_retries: i64) -> DbResult<SyncStats> {
        let (total, pending, success, failed, partial, awaiting_retry, exhausted): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'partial' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status IN ('failed', 'partial') AND retry_count < ?1
                                  THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status IN ('failed', 'partial') AND retry_count >= ?1
                                  THEN 1 ELSE 0 END), 0)
            FROM sync_records
            "#,
        )
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        let last_success_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT last_synced_at FROM sync_records
            WHERE last_synced_at IS NOT NULL
            ORDER BY last_synced_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(SyncStats {
            total,
            pending,
            success,
            failed,
            partial,
            awaiting_retry,
            exhausted,
            last_success_at,
        })
    }

    /// Total number of records.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
