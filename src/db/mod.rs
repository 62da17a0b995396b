//! Database layer for mineru-batch
//!
//! Handles SQLite persistence of batch history.
//!
//! ## Submodules
//!
//! Methods on [`HistoryStore`] are organized by concern:
//! - [`migrations`]: store lifecycle, schema migrations
//! - [`history`]: upsert with eviction, listing, removal

use crate::error::DatabaseError;
use crate::types::{BatchId, BatchStatus, HistoryEntry, UploadFile};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod history;
mod migrations;

/// History record as stored in the `batch_history` table
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    /// Local batch id
    pub batch_id: String,
    /// Remote batch id
    pub remote_id: Option<String>,
    /// Batch status code (see [`BatchStatus::to_i32`])
    pub status: i32,
    /// Per-file state as a JSON array
    pub files: String,
    /// Output directory on disk
    pub output_dir: Option<String>,
    /// Error summary
    pub error_message: Option<String>,
    /// Submission time, unix millis
    pub created_at: i64,
    /// Last transition time, unix millis
    pub updated_at: i64,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = DatabaseError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| DatabaseError::CorruptRecord {
            batch_id: row.batch_id.clone(),
            reason,
        };

        let status = BatchStatus::from_i32(row.status)
            .ok_or_else(|| corrupt(format!("unknown status code {}", row.status)))?;
        let files: Vec<UploadFile> = serde_json::from_str(&row.files)
            .map_err(|e| corrupt(format!("unreadable file list: {}", e)))?;

        Ok(HistoryEntry {
            batch_id: BatchId(row.batch_id),
            remote_id: row.remote_id,
            status,
            files,
            output_dir: row.output_dir.map(PathBuf::from),
            error: row.error_message,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Durable batch history, capped at a fixed number of entries
///
/// One row per batch id. Writes go through [`HistoryStore::upsert`], which
/// evicts the least recently updated rows once the cap is exceeded.
pub struct HistoryStore {
    pool: SqlitePool,
    limit: usize,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
