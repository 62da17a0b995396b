//! Poll loop.

use super::{BatchWorker, Halt, Step};
use crate::remote::{RemoteBatchStatus, RemoteState};
use crate::types::{BatchStatus, FileStatus};
use tracing::{debug, info};

impl BatchWorker {
    /// Poll until every tracked file is terminal on the remote side
    ///
    /// Returns the last remote status. Per-file progress is published
    /// whenever it changes.
    pub(super) async fn poll_until_settled(&mut self) -> Step<RemoteBatchStatus> {
        self.transition(BatchStatus::Polling);

        let Some(remote_id) = self.batch.remote_id.clone() else {
            return Err(Halt::Failed("poll failed: batch has no remote id".to_string()));
        };
        let tracked_names: Vec<String> = self
            .tracked
            .iter()
            .map(|&i| self.batch.files[i].display_name.clone())
            .collect();

        loop {
            self.checkpoint()?;
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                _ = tokio::time::sleep(self.ctx.poll_interval) => {}
            }
            self.checkpoint()?;

            let polled = self.ctx.client.poll_status(&remote_id, &self.cancel).await;
            self.checkpoint()?;
            let status = polled.map_err(|e| Halt::step("poll", &e))?;

            if self.apply_remote(&status) {
                self.emit();
            }

            match status.state(&tracked_names) {
                RemoteState::Done => {
                    info!(batch_id = %self.batch.id, %remote_id, "Remote processing finished");
                    return Ok(status);
                }
                RemoteState::Failed => {
                    let reason = status
                        .files
                        .iter()
                        .find_map(|f| f.error.clone())
                        .unwrap_or_else(|| "every file failed remotely".to_string());
                    return Err(Halt::Failed(format!("processing failed: {}", reason)));
                }
                state => {
                    debug!(batch_id = %self.batch.id, ?state, "Batch still processing");
                }
            }
        }
    }

    /// Fold remote per-file state into the batch; returns whether anything changed
    fn apply_remote(&mut self, status: &RemoteBatchStatus) -> bool {
        let mut changed = false;

        for &index in &self.tracked {
            let file = &mut self.batch.files[index];
            let Some(remote) = status.file(&file.display_name) else {
                continue;
            };
            let before = file.clone();

            match remote.state {
                RemoteState::Queued => {}
                RemoteState::Running => {
                    if matches!(file.status, FileStatus::Pending | FileStatus::Uploaded) {
                        file.status = FileStatus::Processing;
                    }
                }
                RemoteState::Done => {
                    if file.status != FileStatus::Done {
                        file.status = FileStatus::Processing;
                    }
                    file.result_url = remote.result_url.clone();
                }
                RemoteState::Failed => {
                    file.fail(
                        remote
                            .error
                            .clone()
                            .unwrap_or_else(|| "remote processing failed".to_string()),
                    );
                }
            }
            if remote.extracted_pages.is_some() {
                file.extracted_pages = remote.extracted_pages;
            }
            if remote.total_pages.is_some() {
                file.total_pages = remote.total_pages;
            }

            changed |= *file != before;
        }

        changed
    }
}
