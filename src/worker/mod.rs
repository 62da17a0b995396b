//! Batch worker: drives one batch through its state machine
//!
//! ```text
//! Created → Uploading → Queued → Polling → Downloading → Extracting → Completed
//!                 └───────────┴────────┴──────────┴─────────────┴──→ Cancelled | Failed
//! ```
//!
//! The worker owns its [`Batch`] and publishes a [`BatchEvent`] snapshot after
//! every change. The cancellation token is checked before and after every
//! suspend point (remote calls, poll sleeps, extraction); a remote call that
//! has already been issued is allowed to finish and its result is dropped.
//! Errors never escape the worker: they end the batch in `Failed` with an
//! error summary.
//!
//! Submodules:
//! - `upload`: batch registration and sequential file uploads
//! - `polling`: the poll loop and per-file remote state
//! - `results`: download and extraction of result packages

use crate::config::ParseOptions;
use crate::error::Error;
use crate::materializer::ResultMaterializer;
use crate::remote::RemoteServiceClient;
use crate::types::{Batch, BatchEvent, BatchStatus, FileStatus};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod polling;
mod results;
mod upload;

/// Where a worker enters the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartPoint {
    /// New batch: register, upload, then poll
    Fresh,
    /// Resumed batch: the remote already has every file, go straight to polling
    Polling,
}

/// Everything a worker needs besides its batch, shared by all workers of a manager
#[derive(Clone)]
pub struct WorkerContext {
    /// Remote service with retry and timeout applied
    pub client: RemoteServiceClient,
    /// Result package unpacker
    pub materializer: ResultMaterializer,
    /// Parsing options sent when registering the batch
    pub options: ParseOptions,
    /// Root under which each batch gets `<remote id>/`
    pub output_root: PathBuf,
    /// Pause between status polls
    pub poll_interval: Duration,
}

/// Why a worker stopped before completing
#[derive(Debug)]
pub(crate) enum Halt {
    Cancelled,
    Failed(String),
}

impl Halt {
    /// Failure of one step, summarized as `"<step> failed: <error>"`
    fn step(step: &str, error: &Error) -> Self {
        Halt::Failed(format!("{} failed: {}", step, error))
    }
}

type Step<T> = std::result::Result<T, Halt>;

/// Drives one batch from its start point to a terminal state
pub struct BatchWorker {
    batch: Batch,
    ctx: WorkerContext,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<BatchEvent>,
    /// Indices of files the remote side is expected to process
    tracked: Vec<usize>,
}

impl BatchWorker {
    /// Create a worker for `batch`
    ///
    /// Events are sent on `events`; a closed channel is not an error.
    pub fn new(
        batch: Batch,
        ctx: WorkerContext,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<BatchEvent>,
    ) -> Self {
        Self {
            batch,
            ctx,
            cancel,
            events,
            tracked: Vec::new(),
        }
    }

    /// Run to a terminal state and return the final batch
    ///
    /// Exactly one terminal event (`Completed`, `Cancelled` or `Failed`) is
    /// emitted, and it is the last event of the run.
    pub async fn run(mut self, start: StartPoint) -> Batch {
        info!(batch_id = %self.batch.id, ?start, files = self.batch.files.len(), "Batch worker started");

        let outcome = match start {
            StartPoint::Fresh => self.run_fresh().await,
            StartPoint::Polling => self.run_resumed().await,
        };

        match outcome {
            Ok(()) => {
                info!(
                    batch_id = %self.batch.id,
                    succeeded = self.batch.success_count(),
                    failed = self.batch.failure_count(),
                    "Batch completed"
                );
            }
            Err(Halt::Cancelled) => {
                info!(batch_id = %self.batch.id, status = %self.batch.status, "Batch cancelled");
                self.transition(BatchStatus::Cancelled);
            }
            Err(Halt::Failed(summary)) => {
                error!(batch_id = %self.batch.id, error = %summary, "Batch failed");
                self.batch.error = Some(summary);
                self.transition(BatchStatus::Failed);
            }
        }

        self.batch
    }

    async fn run_fresh(&mut self) -> Step<()> {
        self.emit();
        self.upload().await?;
        self.transition(BatchStatus::Queued);
        self.poll_and_finish().await
    }

    async fn run_resumed(&mut self) -> Step<()> {
        if self.batch.remote_id.is_none() {
            return Err(Halt::Failed("resume failed: batch has no remote id".to_string()));
        }
        self.batch.error = None;
        self.poll_and_finish().await
    }

    async fn poll_and_finish(&mut self) -> Step<()> {
        self.tracked = (0..self.batch.files.len())
            .filter(|&i| self.batch.files[i].status != FileStatus::Failed)
            .collect();

        let ready = self.poll_until_settled().await?;
        let packages = self.download(&ready).await?;
        self.extract(packages).await?;

        if self.batch.success_count() == 0 {
            return Err(Halt::Failed(
                "extract failed: no result package could be materialized".to_string(),
            ));
        }

        self.transition(BatchStatus::Completed);
        Ok(())
    }

    /// Cancellation checkpoint
    fn checkpoint(&self) -> Step<()> {
        if self.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, status: BatchStatus) {
        self.batch.status = status;
        self.emit();
    }

    fn emit(&mut self) {
        self.batch.updated_at = Utc::now();
        // the manager may already be gone during shutdown
        self.events.send(BatchEvent::from(&self.batch)).ok();
    }

    fn batch_dir(&self) -> PathBuf {
        match &self.batch.output_dir {
            Some(dir) => dir.clone(),
            None => self
                .ctx
                .output_root
                .join(self.batch.remote_id.as_deref().unwrap_or(self.batch.id.as_str())),
        }
    }
}
