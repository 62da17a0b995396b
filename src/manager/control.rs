//! Batch control: start, cancel, resume.

use crate::config::ParseOptions;
use crate::error::{Error, Result};
use crate::types::{Batch, BatchEvent, BatchId, BatchStatus, HistoryEntry, UploadFile};
use crate::worker::{BatchWorker, StartPoint, WorkerContext};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::{ActiveBatch, TaskManager};

impl TaskManager {
    /// Submit files as a new batch
    ///
    /// Validates the input, records the batch as `Created` in history, spawns
    /// a worker for it and returns its id right away. Progress is reported
    /// through [`TaskManager::subscribe`].
    /// `options` overrides the configured parse options for this batch.
    ///
    /// # Errors
    ///
    /// - `Validation` if `paths` is empty or a path is not a readable file
    /// - `ShuttingDown` once [`TaskManager::shutdown`] has started
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mineru_batch::*;
    /// # async fn example(manager: TaskManager) -> Result<()> {
    /// let id = manager
    ///     .start_batch(vec!["paper.pdf".into()], None)
    ///     .await?;
    /// println!("submitted {id}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_batch(
        &self,
        paths: Vec<PathBuf>,
        options: Option<ParseOptions>,
    ) -> Result<BatchId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if paths.is_empty() {
            return Err(Error::Validation("no files to submit".to_string()));
        }
        for path in &paths {
            check_readable(path).await?;
        }

        let files = paths.into_iter().map(UploadFile::new).collect();
        let batch = Batch::new(BatchId::generate(), files);
        let id = batch.id.clone();

        let mut ctx = self.ctx.clone();
        if let Some(options) = options {
            ctx.options = options.normalized();
        }

        tracing::info!(batch_id = %id, files = batch.files.len(), "Starting batch");
        let evicted = self
            .history
            .upsert(&HistoryEntry::from(&BatchEvent::from(&batch)))
            .await?;
        for old in evicted {
            tracing::debug!(batch_id = %old, "Evicted from history");
        }
        self.spawn_worker(batch, ctx, StartPoint::Fresh).await?;
        Ok(id)
    }

    /// Request cancellation of a running batch
    ///
    /// The worker stops at its next checkpoint and emits a single `Cancelled`
    /// event. Unknown or already finished batches are ignored.
    pub async fn cancel_batch(&self, id: &BatchId) {
        let active = self.active.lock().await;
        match active.get(id) {
            Some(entry) => {
                tracing::info!(batch_id = %id, "Cancelling batch");
                entry.cancel.cancel();
            }
            None => {
                tracing::debug!(batch_id = %id, "Cancel ignored, batch not active");
            }
        }
    }

    /// Re-attach to a batch recorded in history
    ///
    /// Batches that got past uploading re-enter polling without uploading
    /// anything; a `Completed` batch is polled again and its results
    /// re-downloaded.
    ///
    /// # Errors
    ///
    /// - `Resume` if the batch is unknown, still running, has no remote id, or
    ///   its last state was `Created`, `Uploading`, `Failed` or `Cancelled`
    /// - `ShuttingDown` once [`TaskManager::shutdown`] has started
    pub async fn resume_batch(&self, id: &BatchId) -> Result<()> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let entry = self
            .history
            .get(id)
            .await?
            .ok_or_else(|| Error::Resume(format!("no history for batch {}", id)))?;

        match entry.status {
            status if status.is_past_upload() => {}
            BatchStatus::Completed => {}
            BatchStatus::Created | BatchStatus::Uploading => {
                return Err(Error::Resume(format!(
                    "batch {} never finished uploading; re-submit the files",
                    id
                )));
            }
            status => {
                return Err(Error::Resume(format!(
                    "batch {} ended as {}; re-submit the files",
                    id, status
                )));
            }
        }
        if entry.remote_id.is_none() {
            return Err(Error::Resume(format!("batch {} has no remote id", id)));
        }

        tracing::info!(batch_id = %id, last_status = %entry.status, "Resuming batch");
        self.spawn_worker(entry.to_batch(), self.ctx.clone(), StartPoint::Polling)
            .await
    }

    /// Register the batch in the active set and run its worker on a new task
    async fn spawn_worker(&self, batch: Batch, ctx: WorkerContext, start: StartPoint) -> Result<()> {
        // the lock is held until the worker is registered so the pump cannot
        // see its terminal event first
        let mut active = self.active.lock().await;
        if active.contains_key(&batch.id) {
            return Err(Error::Resume(format!("batch {} is still running", batch.id)));
        }

        let cancel = CancellationToken::new();
        let id = batch.id.clone();
        let worker = BatchWorker::new(batch, ctx, cancel.clone(), self.worker_tx.clone());
        tokio::spawn(async move {
            worker.run(start).await;
        });
        active.insert(id, ActiveBatch { cancel });
        Ok(())
    }
}

async fn check_readable(path: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        Error::Validation(format!("cannot read '{}': {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(Error::Validation(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    tokio::fs::File::open(path).await.map_err(|e| {
        Error::Validation(format!("cannot read '{}': {}", path.display(), e))
    })?;
    Ok(())
}
