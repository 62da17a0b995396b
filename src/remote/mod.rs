//! Remote document-parsing service
//!
//! [`RemoteService`] is the raw transport: create a batch, upload a file to the
//! location the service handed out, poll the batch, fetch a result package.
//! [`HttpRemoteService`] speaks the MinerU batch HTTP API. Workers never talk to
//! a transport directly; they go through [`RemoteServiceClient`], which adds the
//! retry policy and a per-call timeout on top of any transport.

mod client;
mod credentials;
mod http;

pub use client::RemoteServiceClient;
pub use credentials::{CredentialSource, EnvCredential, StaticCredential, DEFAULT_API_KEY_VAR};
pub use http::HttpRemoteService;

use crate::config::ParseOptions;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Raw operations offered by the remote parsing service
///
/// Implementations classify failures into the crate error taxonomy
/// (`Auth`, `Transient`, `Permanent`, `NotFound`, `Expired`, `Validation`);
/// retrying is the caller's concern.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Register a batch for the given display names
    ///
    /// Returns the remote batch id and one upload location per name, in order.
    async fn create_batch(&self, names: &[String], options: &ParseOptions) -> Result<BatchHandle>;

    /// Upload the file at `path` to an upload location from [`BatchHandle`]
    async fn upload_file(&self, location: &str, path: &Path) -> Result<()>;

    /// Fetch the current per-file state of a batch
    async fn poll_status(&self, remote_id: &str) -> Result<RemoteBatchStatus>;

    /// Download the result package behind `url`
    async fn download_result(&self, url: &str) -> Result<Vec<u8>>;
}

/// Result of registering a batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchHandle {
    /// Id assigned by the remote service
    pub remote_id: String,
    /// Upload locations, aligned with the submitted names
    pub upload_urls: Vec<String>,
}

/// Remote processing state of a file, or of a whole batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    /// Accepted, not started
    Queued,
    /// Being parsed
    Running,
    /// Result package available
    Done,
    /// Parsing failed
    Failed,
}

impl RemoteState {
    /// Map a remote state string; unknown values count as queued
    pub fn parse(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "done" => RemoteState::Done,
            "failed" | "error" => RemoteState::Failed,
            "running" | "processing" | "converting" => RemoteState::Running,
            _ => RemoteState::Queued,
        }
    }

    /// Whether the remote will not change this state any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteState::Done | RemoteState::Failed)
    }
}

/// Remote view of one file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileStatus {
    /// Display name the file was registered under
    pub file_name: String,
    /// Processing state
    pub state: RemoteState,
    /// Result package URL once `Done`
    pub result_url: Option<String>,
    /// Remote error message once `Failed`
    pub error: Option<String>,
    /// Pages parsed so far
    pub extracted_pages: Option<u32>,
    /// Total pages
    pub total_pages: Option<u32>,
}

impl RemoteFileStatus {
    /// Status with only a name and state set
    pub fn new(file_name: impl Into<String>, state: RemoteState) -> Self {
        Self {
            file_name: file_name.into(),
            state,
            result_url: None,
            error: None,
            extracted_pages: None,
            total_pages: None,
        }
    }
}

/// Remote view of a batch: one entry per file the service knows about
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteBatchStatus {
    /// Per-file states, in the order the service listed them
    pub files: Vec<RemoteFileStatus>,
}

impl RemoteBatchStatus {
    /// Look up a file by display name
    pub fn file(&self, name: &str) -> Option<&RemoteFileStatus> {
        self.files.iter().find(|f| f.file_name == name)
    }

    /// Aggregate state over the files in `expected`
    ///
    /// Files missing from the remote listing count as queued. Once every file
    /// is terminal the batch is `Done` if at least one file succeeded.
    pub fn state<S: AsRef<str>>(&self, expected: &[S]) -> RemoteState {
        let states: Vec<RemoteState> = expected
            .iter()
            .map(|name| {
                self.file(name.as_ref())
                    .map(|f| f.state)
                    .unwrap_or(RemoteState::Queued)
            })
            .collect();

        if states.iter().all(RemoteState::is_terminal) {
            if states.contains(&RemoteState::Done) {
                RemoteState::Done
            } else {
                RemoteState::Failed
            }
        } else if states.contains(&RemoteState::Running) {
            RemoteState::Running
        } else {
            RemoteState::Queued
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn listing(entries: &[(&str, RemoteState)]) -> RemoteBatchStatus {
        RemoteBatchStatus {
            files: entries
                .iter()
                .map(|(name, state)| RemoteFileStatus::new(*name, *state))
                .collect(),
        }
    }

    #[test]
    fn remote_state_strings_map_to_four_states() {
        assert_eq!(RemoteState::parse("waiting-file"), RemoteState::Queued);
        assert_eq!(RemoteState::parse("pending"), RemoteState::Queued);
        assert_eq!(RemoteState::parse("Running"), RemoteState::Running);
        assert_eq!(RemoteState::parse("converting"), RemoteState::Running);
        assert_eq!(RemoteState::parse("done"), RemoteState::Done);
        assert_eq!(RemoteState::parse("error"), RemoteState::Failed);
        assert_eq!(RemoteState::parse(""), RemoteState::Queued);
    }

    #[test]
    fn batch_is_done_only_when_every_file_is_terminal() {
        let status = listing(&[("a.pdf", RemoteState::Done), ("b.pdf", RemoteState::Running)]);
        assert_eq!(status.state(&["a.pdf", "b.pdf"]), RemoteState::Running);

        let status = listing(&[("a.pdf", RemoteState::Done), ("b.pdf", RemoteState::Failed)]);
        assert_eq!(status.state(&["a.pdf", "b.pdf"]), RemoteState::Done);

        let status = listing(&[("a.pdf", RemoteState::Failed), ("b.pdf", RemoteState::Failed)]);
        assert_eq!(status.state(&["a.pdf", "b.pdf"]), RemoteState::Failed);
    }

    #[test]
    fn missing_files_count_as_queued() {
        let status = listing(&[("a.pdf", RemoteState::Done)]);
        assert_eq!(status.state(&["a.pdf", "b.pdf"]), RemoteState::Queued);
        assert_eq!(RemoteBatchStatus::default().state(&["a.pdf"]), RemoteState::Queued);
    }
}
