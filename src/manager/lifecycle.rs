//! Startup and shutdown coordination.

use crate::config::Config;
use crate::db::HistoryStore;
use crate::error::Result;
use crate::materializer::ResultMaterializer;
use crate::remote::{CredentialSource, HttpRemoteService, RemoteService, RemoteServiceClient};
use crate::types::{BatchId, BatchStatus, FileStatus};
use crate::worker::WorkerContext;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc};

use super::TaskManager;
use super::events::spawn_event_pump;

/// Error summary for batches a previous process left mid-upload
pub const INTERRUPTED_UPLOAD: &str = "interrupted before upload finished; re-submit the files";

impl TaskManager {
    /// Create a manager over any remote service
    ///
    /// Validates `config`, opens the history store, starts the event pump and
    /// recovers batches a previous process left unfinished: those interrupted
    /// during upload are marked failed, the others are listed by
    /// [`TaskManager::interrupted_batches`] and resumed right away when
    /// `runtime.auto_resume` is set.
    ///
    /// Must be called within a tokio runtime.
    pub async fn new(config: Config, service: Arc<dyn RemoteService>) -> Result<Self> {
        config.validate()?;

        let history = Arc::new(
            HistoryStore::open(
                &config.persistence.database_path,
                config.persistence.history_limit,
            )
            .await?,
        );

        let ctx = WorkerContext {
            client: RemoteServiceClient::new(
                service,
                config.retry.clone(),
                config.api.request_timeout,
            ),
            materializer: ResultMaterializer::new(config.output.summary_artifact.clone()),
            options: config.options.clone().normalized(),
            output_root: config.output.output_dir.clone(),
            poll_interval: config.polling.interval,
        };

        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (event_tx, _rx) = broadcast::channel(config.runtime.event_buffer.max(1));
        let active = Arc::new(Mutex::new(HashMap::new()));

        spawn_event_pump(worker_rx, history.clone(), active.clone(), event_tx.clone());

        let manager = Self {
            config: Arc::new(config),
            ctx,
            history,
            active,
            worker_tx,
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        manager.recover_interrupted().await?;

        Ok(manager)
    }

    /// Create a manager talking to the MinerU HTTP API at `config.api.base_url`
    pub async fn with_credentials(
        config: Config,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self> {
        let service = HttpRemoteService::new(&config.api, credentials)?;
        Self::new(config, Arc::new(service)).await
    }

    /// Batches left unfinished by a previous process that can be resumed
    ///
    /// Batches that are currently running are not listed.
    pub async fn interrupted_batches(&self) -> Result<Vec<BatchId>> {
        let pending = self.history.non_terminal().await?;
        let active = self.active.lock().await;
        Ok(pending
            .into_iter()
            .map(|entry| entry.batch_id)
            .filter(|id| !active.contains_key(id))
            .collect())
    }

    /// Inspect non-terminal history left by a previous run
    async fn recover_interrupted(&self) -> Result<()> {
        let pending = self.history.non_terminal().await?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut resumable = Vec::new();
        for mut entry in pending {
            if entry.status.is_past_upload() && entry.remote_id.is_some() {
                resumable.push(entry.batch_id);
                continue;
            }

            tracing::warn!(
                batch_id = %entry.batch_id,
                last_status = %entry.status,
                "Batch interrupted before upload finished, marking failed"
            );
            entry.status = BatchStatus::Failed;
            entry.error = Some(INTERRUPTED_UPLOAD.to_string());
            entry.updated_at = Utc::now();
            for file in &mut entry.files {
                if !file.status.is_terminal() && file.status != FileStatus::Uploaded {
                    file.fail(INTERRUPTED_UPLOAD);
                }
            }
            self.history.upsert(&entry).await?;
        }

        tracing::info!(
            count = resumable.len(),
            auto_resume = self.config.runtime.auto_resume,
            "Found interrupted batches"
        );

        if self.config.runtime.auto_resume {
            for id in resumable {
                if let Err(e) = self.resume_batch(&id).await {
                    tracing::error!(batch_id = %id, error = %e, "Failed to resume interrupted batch");
                }
            }
        }

        Ok(())
    }

    /// Gracefully shut down the manager
    ///
    /// 1. Stops accepting new and resumed batches
    /// 2. Cancels every running worker
    /// 3. Waits, bounded by `runtime.shutdown_timeout`, for their terminal
    ///    events to be persisted
    ///
    /// Workers still running after the timeout are left to finish on their own.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new batches");

        self.cancel_all().await;

        let timeout = self.config.runtime.shutdown_timeout;
        match tokio::time::timeout(timeout, self.wait_for_active_batches()).await {
            Ok(()) => tracing::info!("All batches stopped"),
            Err(_) => tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Timeout waiting for batches to stop, proceeding with shutdown"
            ),
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn cancel_all(&self) {
        let active = self.active.lock().await;
        tracing::debug!(active_count = active.len(), "Cancelling all active batches");
        for (id, entry) in active.iter() {
            tracing::debug!(batch_id = %id, "Signaling cancellation");
            entry.cancel.cancel();
        }
    }

    async fn wait_for_active_batches(&self) {
        loop {
            let active_count = self.active.lock().await.len();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for active batches to stop");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
