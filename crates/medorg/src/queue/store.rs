//! The durable work queue over PostgreSQL.
//!
//! All coordination between workers happens through these operations. Claims
//! are single atomic statements (`FOR UPDATE SKIP LOCKED`), every mutation is
//! one transaction, and `updated_at` is maintained by a trigger — never by
//! callers.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::item::{ItemStatus, QueueItem};
use crate::config::RetryConfig;
use crate::error::QueueError;

/// Leading phrase of the single non-retriable error class.
pub const NON_RETRIABLE_PREFIX: &str = "No movie code";

/// The retry scheduler re-arms everything except the non-retriable class.
pub fn is_retriable(error_message: &str) -> bool {
    !error_message.starts_with(NON_RETRIABLE_PREFIX)
}

/// Backoff before the next retry attempt: `BACKOFF[min(retry_count - 1,
/// len - 1)]` minutes, where `retry_count` is the just-incremented value.
pub(crate) fn backoff_delay(retry: &RetryConfig, retry_count: i32) -> chrono::Duration {
    let index = (retry_count.max(1) - 1) as usize;
    let minutes = retry.backoff_minutes[index.min(retry.backoff_minutes.len() - 1)];
    chrono::Duration::minutes(minutes)
}

/// Optional field patch applied alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct UpdateFields {
    pub error_message: Option<String>,
    pub new_path: Option<String>,
    pub emby_item_id: Option<String>,
    pub metadata_json: Option<serde_json::Value>,
    pub movie_code: Option<String>,
    pub actress: Option<String>,
    pub subtitle: Option<String>,
}

#[derive(Clone)]
pub struct QueueStore {
    pool: PgPool,
    retry: RetryConfig,
}

impl QueueStore {
    pub fn new(pool: PgPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    pub fn max_retries(&self) -> i32 {
        self.retry.max_retries
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Idempotent insert keyed on `file_path`; a duplicate returns the
    /// existing row unchanged.
    pub async fn add(
        &self,
        file_path: &str,
        movie_code: Option<&str>,
        actress: Option<&str>,
        subtitle: Option<&str>,
    ) -> Result<QueueItem, QueueError> {
        let inserted = sqlx::query_as::<_, QueueItem>(
            r#"
            INSERT INTO processing_queue (file_path, movie_code, actress, subtitle)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (file_path) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(file_path)
        .bind(movie_code)
        .bind(actress)
        .bind(subtitle)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(item) => {
                info!(id = item.id, file_path, "queue item added");
                Ok(item)
            }
            None => {
                debug!(file_path, "file already queued");
                self.get_by_path(file_path)
                    .await?
                    .ok_or(QueueError::Database(sqlx::Error::RowNotFound))
            }
        }
    }

    /// Claim the oldest `pending` row, transitioning it to `processing`.
    pub async fn claim_pending(&self) -> Result<Option<QueueItem>, QueueError> {
        self.claim(ItemStatus::Pending, ItemStatus::Processing).await
    }

    /// Claim the oldest `moved` row, transitioning it to `emby_pending`.
    pub async fn claim_moved(&self) -> Result<Option<QueueItem>, QueueError> {
        self.claim(ItemStatus::Moved, ItemStatus::EmbyPending).await
    }

    /// Atomic claim: the locked sub-select skips rows other workers are
    /// claiming, so no two callers ever observe the same row.
    async fn claim(
        &self,
        from: ItemStatus,
        to: ItemStatus,
    ) -> Result<Option<QueueItem>, QueueError> {
        let claimed = sqlx::query_as::<_, QueueItem>(
            r#"
            UPDATE processing_queue
               SET status = $2
             WHERE id = (
                   SELECT id FROM processing_queue
                    WHERE status = $1
                    ORDER BY created_at ASC
                    LIMIT 1
                      FOR UPDATE SKIP LOCKED
                   )
            RETURNING *
            "#,
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(item) = &claimed {
            debug!(id = item.id, file = item.filename(), from = %from, to = %to, "claimed item");
        }
        Ok(claimed)
    }

    /// Apply a field patch and transition `status`. A transition into
    /// `error` also increments `retry_count` and schedules `next_retry_at`
    /// from the backoff table, in the same transaction.
    pub async fn update_status(
        &self,
        id: i64,
        status: ItemStatus,
        fields: UpdateFields,
    ) -> Result<Option<QueueItem>, QueueError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, QueueItem>(
            r#"
            UPDATE processing_queue
               SET status        = $2,
                   error_message = COALESCE($3, error_message),
                   new_path      = COALESCE($4, new_path),
                   emby_item_id  = COALESCE($5, emby_item_id),
                   metadata_json = COALESCE($6, metadata_json),
                   movie_code    = COALESCE($7, movie_code),
                   actress       = COALESCE($8, actress),
                   subtitle      = COALESCE($9, subtitle),
                   retry_count   = retry_count + CASE WHEN $2 = 'error' THEN 1 ELSE 0 END
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(fields.error_message)
        .bind(fields.new_path)
        .bind(fields.emby_item_id)
        .bind(fields.metadata_json)
        .bind(fields.movie_code)
        .bind(fields.actress)
        .bind(fields.subtitle)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut item) = updated else {
            tx.rollback().await?;
            warn!(id, "queue item not found for update");
            return Ok(None);
        };

        if status == ItemStatus::Error {
            let next_retry: DateTime<Utc> =
                Utc::now() + backoff_delay(&self.retry, item.retry_count);
            item = sqlx::query_as::<_, QueueItem>(
                "UPDATE processing_queue SET next_retry_at = $2 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(next_retry)
            .fetch_one(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(id, status = %status, "queue item status updated");
        Ok(Some(item))
    }

    /// Error rows whose backoff has elapsed and whose retry budget remains.
    pub async fn list_retryable_errors(&self, limit: i64) -> Result<Vec<QueueItem>, QueueError> {
        let items = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT * FROM processing_queue
             WHERE status = 'error'
               AND retry_count <= $1
               AND next_retry_at <= NOW()
             ORDER BY next_retry_at ASC
             LIMIT $2
            "#,
        )
        .bind(self.retry.max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Move an `error` row back to `pending`, clearing the error bookkeeping
    /// but keeping `retry_count` (the backoff history is the row's memory).
    pub async fn reset_for_retry(&self, id: i64) -> Result<Option<QueueItem>, QueueError> {
        let item = sqlx::query_as::<_, QueueItem>(
            r#"
            UPDATE processing_queue
               SET status = 'pending', error_message = NULL, next_retry_at = NULL
             WHERE id = $1 AND status = 'error'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(item) = &item {
            info!(id, retry_count = item.retry_count, "reset item for retry");
        }
        Ok(item)
    }

    /// Reset every retriable `error` row to `pending`; returns the ids.
    pub async fn reset_all_retriable(&self) -> Result<Vec<i64>, QueueError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE processing_queue
               SET status = 'pending', error_message = NULL, next_retry_at = NULL
             WHERE status = 'error'
               AND (error_message IS NULL OR error_message NOT LIKE $1)
            RETURNING id
            "#,
        )
        .bind(format!("{NON_RETRIABLE_PREFIX}%"))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Operator force-reset: any status back to `pending`, with a fresh
    /// retry budget.
    pub async fn force_reset(&self, id: i64) -> Result<Option<QueueItem>, QueueError> {
        let item = sqlx::query_as::<_, QueueItem>(
            r#"
            UPDATE processing_queue
               SET status = 'pending', error_message = NULL,
                   retry_count = 0, next_retry_at = NULL
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueItem>, QueueError> {
        let item =
            sqlx::query_as::<_, QueueItem>("SELECT * FROM processing_queue WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(item)
    }

    pub async fn get_by_path(&self, file_path: &str) -> Result<Option<QueueItem>, QueueError> {
        let item = sqlx::query_as::<_, QueueItem>(
            "SELECT * FROM processing_queue WHERE file_path = $1",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn delete(&self, id: i64) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM processing_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(ItemStatus, i64)>, QueueError> {
        let counts = sqlx::query_as::<_, (ItemStatus, i64)>(
            r#"
            SELECT status, COUNT(*) FROM processing_queue
             GROUP BY status
             ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    pub async fn list_by_status(
        &self,
        status: ItemStatus,
        limit: i64,
    ) -> Result<Vec<QueueItem>, QueueError> {
        let items = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT * FROM processing_queue
             WHERE status = $1
             ORDER BY created_at DESC
             LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Most recent rows across all statuses, for operator listings.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<QueueItem>, QueueError> {
        let items = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT * FROM processing_queue
             ORDER BY created_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// `created_at` of the oldest pending row, for operator status output.
    pub async fn oldest_pending(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        let created = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT created_at FROM processing_queue
             WHERE status = 'pending'
             ORDER BY created_at ASC
             LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(created)
    }

    /// Error rows whose backoff has already elapsed (or never got one).
    pub async fn count_ready_retryable(&self) -> Result<i64, QueueError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM processing_queue
             WHERE status = 'error'
               AND (next_retry_at IS NULL OR next_retry_at <= NOW())
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn count_cleanup_candidates(&self, older_than_days: i32) -> Result<i64, QueueError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM processing_queue
             WHERE status = 'completed'
               AND updated_at < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(older_than_days)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Delete completed rows older than the cutoff; returns the count.
    pub async fn cleanup_completed(&self, older_than_days: i32) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM processing_queue
             WHERE status = 'completed'
               AND updated_at < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(older_than_days)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, older_than_days, "cleaned up completed items");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry() -> RetryConfig {
        RetryConfig::default()
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(&retry(), 1), chrono::Duration::minutes(1));
        assert_eq!(backoff_delay(&retry(), 2), chrono::Duration::minutes(5));
        assert_eq!(backoff_delay(&retry(), 3), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_backoff_clamps_to_last_entry() {
        assert_eq!(backoff_delay(&retry(), 4), chrono::Duration::minutes(15));
        assert_eq!(backoff_delay(&retry(), 99), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_backoff_tolerates_zero_count() {
        // retry_count is always >= 1 on an error transition, but a bad
        // caller value must not panic.
        assert_eq!(backoff_delay(&retry(), 0), chrono::Duration::minutes(1));
    }

    #[test]
    fn test_retriable_classifier() {
        assert!(!is_retriable("No movie code found in filename: x.mp4"));
        assert!(is_retriable("No metadata found for movie code: AB-1"));
        assert!(is_retriable("File move failure: permission denied"));
        assert!(is_retriable("Item not indexed for path: /d/a/f.mp4"));
        assert!(is_retriable("Rescan failure for parent folder 4"));
        assert!(is_retriable("Metadata write failure for item 9"));
    }
}
