//! History operations.

use crate::types::{BatchId, BatchStatus, HistoryEntry};
use crate::{Error, Result};

use super::{HistoryRow, HistoryStore};

const SELECT_COLUMNS: &str = r#"
    SELECT batch_id, remote_id, status, files, output_dir, error_message,
           created_at, updated_at
    FROM batch_history
"#;

impl HistoryStore {
    /// Insert or replace the entry for `entry.batch_id`, then enforce the cap
    ///
    /// Runs in one transaction. Returns the ids evicted to get back under the
    /// cap, oldest first.
    pub async fn upsert(&self, entry: &HistoryEntry) -> Result<Vec<BatchId>> {
        let files = serde_json::to_string(&entry.files)?;
        let mut tx = self.pool.begin().await.map_err(Error::Sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO batch_history (
                batch_id, remote_id, status, files, output_dir, error_message,
                created_at, updated_at, write_seq
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?,
                    (SELECT COALESCE(MAX(write_seq), 0) + 1 FROM batch_history))
            ON CONFLICT(batch_id) DO UPDATE SET
                remote_id = excluded.remote_id,
                status = excluded.status,
                files = excluded.files,
                output_dir = excluded.output_dir,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at,
                write_seq = excluded.write_seq
            "#,
        )
        .bind(entry.batch_id.as_str())
        .bind(&entry.remote_id)
        .bind(entry.status.to_i32())
        .bind(&files)
        .bind(
            entry
                .output_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(&entry.error)
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(Error::Sqlx)?;

        let overflow: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT batch_id FROM batch_history
            ORDER BY updated_at DESC, write_seq DESC
            LIMIT -1 OFFSET ?
            "#,
        )
        .bind(self.limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Sqlx)?;

        for id in &overflow {
            sqlx::query("DELETE FROM batch_history WHERE batch_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Sqlx)?;
        }

        tx.commit().await.map_err(Error::Sqlx)?;

        if !overflow.is_empty() {
            tracing::debug!(evicted = overflow.len(), limit = self.limit, "History cap reached");
        }

        Ok(overflow.into_iter().rev().map(BatchId).collect())
    }

    /// Get the entry for one batch
    pub async fn get(&self, batch_id: &BatchId) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!("{SELECT_COLUMNS} WHERE batch_id = ?"))
            .bind(batch_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(row.map(HistoryEntry::try_from).transpose()?)
    }

    /// Most recently updated entries first, at most `limit` of them
    pub async fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY updated_at DESC, write_seq DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        rows_to_entries(rows)
    }

    /// Entries whose last recorded status is not terminal
    ///
    /// After a restart these are batches the previous process left behind.
    pub async fn non_terminal(&self) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "{SELECT_COLUMNS} WHERE status NOT IN (?, ?, ?) ORDER BY updated_at DESC, write_seq DESC"
        ))
        .bind(BatchStatus::Completed.to_i32())
        .bind(BatchStatus::Cancelled.to_i32())
        .bind(BatchStatus::Failed.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        rows_to_entries(rows)
    }

    /// Delete one entry; returns whether it existed
    pub async fn remove(&self, batch_id: &BatchId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM batch_history WHERE batch_id = ?")
            .bind(batch_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every entry
    ///
    /// Returns the number of records deleted.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM batch_history")
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }

    /// Number of stored entries
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM batch_history")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)
    }
}

fn rows_to_entries(rows: Vec<HistoryRow>) -> Result<Vec<HistoryEntry>> {
    rows.into_iter()
        .map(|row| HistoryEntry::try_from(row).map_err(Error::from))
        .collect()
}
