//! # mineru-batch
//!
//! Batch orchestration core for the MinerU document-parsing service.
//!
//! Submit a set of PDFs, and the crate registers them as one remote batch,
//! uploads each file, polls until the service finishes parsing, downloads
//! the result packages and unpacks them next to each other on disk.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, embed it in whatever front end you have
//! - **Event-driven** - Every state change is broadcast, no polling required
//! - **Resumable** - Batch history survives restarts; batches that made it
//!   past upload can be re-attached without uploading again
//! - **Pluggable remote** - The HTTP client sits behind [`remote::RemoteService`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use mineru_batch::{Config, TaskManager, EnvCredential};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager =
//!         TaskManager::with_credentials(Config::default(), Arc::new(EnvCredential::default()))
//!             .await?;
//!
//!     let mut events = manager.subscribe();
//!     let id = manager
//!         .start_batch(vec!["paper.pdf".into(), "slides.pdf".into()], None)
//!         .await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if event.batch_id != id {
//!             continue;
//!         }
//!         println!("{} is {}", event.batch_id, event.status);
//!         if event.status.is_terminal() {
//!             break;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch history persistence
pub mod db;
/// Error types
pub mod error;
/// Task manager (decomposed into focused submodules)
pub mod manager;
/// Result package extraction
pub mod materializer;
/// Remote parsing service boundary
pub mod remote;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Per-batch workflow
pub mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, ParseOptions, RetryConfig};
pub use db::HistoryStore;
pub use error::{DatabaseError, Error, Result};
pub use manager::TaskManager;
pub use remote::{
    CredentialSource, EnvCredential, HttpRemoteService, RemoteService, StaticCredential,
};
pub use types::{
    Batch, BatchEvent, BatchId, BatchStatus, FileStatus, HistoryEntry, UploadFile,
};
