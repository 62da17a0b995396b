//! Core types for mineru-batch

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Local identifier of a batch
///
/// Generated when the batch is submitted, before the remote service has
/// assigned its own id. It keys the active set, the history store and every
/// event for the whole life of the batch.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Generate a fresh provisional id (`local-<unix millis>-<8 hex digits>`)
    pub fn generate() -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(0..=u32::MAX);
        Self(format!(
            "local-{}-{:08x}",
            Utc::now().timestamp_millis(),
            suffix
        ))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BatchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-file status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Waiting to be uploaded
    Pending,
    /// Upload in flight
    Uploading,
    /// Upload acknowledged by the storage endpoint
    Uploaded,
    /// Remote service is parsing the file
    Processing,
    /// Result extracted to disk
    Done,
    /// Upload, remote parsing or result handling failed
    Failed,
}

impl FileStatus {
    /// Whether the file has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Done | FileStatus::Failed)
    }
}

/// Batch status, mirroring the worker state machine
///
/// `Created → Uploading → Queued → Polling → Downloading → Extracting → Completed`,
/// with `Cancelled` and `Failed` reachable from every non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Submitted, nothing sent yet
    Created,
    /// Registering the batch and uploading files
    Uploading,
    /// Uploads finished, waiting for the first poll
    Queued,
    /// Polling remote status
    Polling,
    /// Fetching result packages
    Downloading,
    /// Unpacking result packages
    Extracting,
    /// Terminal success
    Completed,
    /// Terminal: cancelled by the user
    Cancelled,
    /// Terminal: unrecoverable error
    Failed,
}

impl BatchStatus {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Failed
        )
    }

    /// Position along the success path; terminal states rank last
    pub fn rank(&self) -> u8 {
        match self {
            BatchStatus::Created => 0,
            BatchStatus::Uploading => 1,
            BatchStatus::Queued => 2,
            BatchStatus::Polling => 3,
            BatchStatus::Downloading => 4,
            BatchStatus::Extracting => 5,
            BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Failed => 6,
        }
    }

    /// Whether every file has been handed to the remote service
    pub fn is_past_upload(&self) -> bool {
        matches!(
            self,
            BatchStatus::Queued
                | BatchStatus::Polling
                | BatchStatus::Downloading
                | BatchStatus::Extracting
        )
    }

    /// Convert integer status code to BatchStatus
    pub fn from_i32(status: i32) -> Option<Self> {
        match status {
            0 => Some(BatchStatus::Created),
            1 => Some(BatchStatus::Uploading),
            2 => Some(BatchStatus::Queued),
            3 => Some(BatchStatus::Polling),
            4 => Some(BatchStatus::Downloading),
            5 => Some(BatchStatus::Extracting),
            6 => Some(BatchStatus::Completed),
            7 => Some(BatchStatus::Cancelled),
            8 => Some(BatchStatus::Failed),
            _ => None,
        }
    }

    /// Convert BatchStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            BatchStatus::Created => 0,
            BatchStatus::Uploading => 1,
            BatchStatus::Queued => 2,
            BatchStatus::Polling => 3,
            BatchStatus::Downloading => 4,
            BatchStatus::Extracting => 5,
            BatchStatus::Completed => 6,
            BatchStatus::Cancelled => 7,
            BatchStatus::Failed => 8,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BatchStatus::Created => "created",
            BatchStatus::Uploading => "uploading",
            BatchStatus::Queued => "queued",
            BatchStatus::Polling => "polling",
            BatchStatus::Downloading => "downloading",
            BatchStatus::Extracting => "extracting",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One file enqueued for a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    /// Local path; identity of the file within its batch
    pub path: PathBuf,
    /// File name shown to the user and sent to the remote service
    pub display_name: String,
    /// Current status
    pub status: FileStatus,
    /// Last error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result package URL, once the remote service reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    /// Pages parsed so far, when the remote reports progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_pages: Option<u32>,
    /// Total pages, when the remote reports progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
}

impl UploadFile {
    /// New pending file; the display name is the path's file name
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            path,
            display_name,
            status: FileStatus::Pending,
            error: None,
            result_url: None,
            extracted_pages: None,
            total_pages: None,
        }
    }

    /// File name without extension, used to name the extraction directory
    pub fn stem(&self) -> String {
        Path::new(&self.display_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.display_name.clone())
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.status = FileStatus::Failed;
        self.error = Some(error.into());
    }
}

/// One submission of one or more files
///
/// Owned by its worker while running; the durable projection lives in the
/// history store once the batch is terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Local id
    pub id: BatchId,
    /// Id assigned by the remote service; never changes once set
    pub remote_id: Option<String>,
    /// Files in submission order; fixed for the batch's lifetime
    pub files: Vec<UploadFile>,
    /// Overall status
    pub status: BatchStatus,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Time of the last transition
    pub updated_at: DateTime<Utc>,
    /// `<output root>/<remote id>`, once known
    pub output_dir: Option<PathBuf>,
    /// Error summary for failed batches
    pub error: Option<String>,
}

impl Batch {
    /// New batch in the `Created` state
    pub fn new(id: BatchId, files: Vec<UploadFile>) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_id: None,
            files,
            status: BatchStatus::Created,
            created_at: now,
            updated_at: now,
            output_dir: None,
            error: None,
        }
    }

    /// Files that finished successfully
    pub fn success_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Done)
            .count()
    }

    /// Files that ended in an error state
    pub fn failure_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .count()
    }
}

/// Event emitted on every batch transition
///
/// Carries a full snapshot so that subscribers and the history store see the
/// same data. Events for one batch arrive in transition order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchEvent {
    /// Local batch id
    pub batch_id: BatchId,
    /// Remote batch id, once assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// New batch status
    pub status: BatchStatus,
    /// Per-file statuses, in submission order
    pub files: Vec<UploadFile>,
    /// Error summary, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output directory, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Submission time of the batch
    pub created_at: DateTime<Utc>,
    /// Time of this transition
    pub updated_at: DateTime<Utc>,
}

impl From<&Batch> for BatchEvent {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id.clone(),
            remote_id: batch.remote_id.clone(),
            status: batch.status,
            files: batch.files.clone(),
            error: batch.error.clone(),
            output_dir: batch.output_dir.clone(),
            created_at: batch.created_at,
            updated_at: batch.updated_at,
        }
    }
}

/// Durable record of a batch's last known state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Local batch id (unique key)
    pub batch_id: BatchId,
    /// Remote batch id
    pub remote_id: Option<String>,
    /// Last observed status
    pub status: BatchStatus,
    /// Per-file state at the last transition
    pub files: Vec<UploadFile>,
    /// Output directory
    pub output_dir: Option<PathBuf>,
    /// Error summary
    pub error: Option<String>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Time of the last recorded transition
    pub updated_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Files that finished successfully
    pub fn success_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Done)
            .count()
    }

    /// Files that ended in an error state
    pub fn failure_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .count()
    }

    /// Rebuild the in-memory batch this entry was projected from
    pub fn to_batch(&self) -> Batch {
        Batch {
            id: self.batch_id.clone(),
            remote_id: self.remote_id.clone(),
            files: self.files.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            output_dir: self.output_dir.clone(),
            error: self.error.clone(),
        }
    }
}

impl From<&BatchEvent> for HistoryEntry {
    fn from(event: &BatchEvent) -> Self {
        Self {
            batch_id: event.batch_id.clone(),
            remote_id: event.remote_id.clone(),
            status: event.status,
            files: event.files.clone(),
            output_dir: event.output_dir.clone(),
            error: event.error.clone(),
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}
