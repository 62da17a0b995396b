//! Waiting on batch events and inspecting output trees

use mineru_batch::{BatchEvent, BatchId, BatchStatus, TaskManager};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

/// Outcome of waiting for a batch to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Terminal event received; every event of the batch in order
    Finished(Vec<BatchEvent>),
    /// No terminal event before the deadline
    Timeout,
    /// Event channel closed or lagged
    ChannelClosed,
}

impl WaitResult {
    /// Events of a finished batch; panics otherwise
    pub fn events(self) -> Vec<BatchEvent> {
        match self {
            WaitResult::Finished(events) => events,
            other => panic!("batch did not finish: {other:?}"),
        }
    }
}

/// Collect events of `id` from `rx` until its terminal event
pub async fn wait_for_terminal(
    rx: &mut broadcast::Receiver<BatchEvent>,
    id: &BatchId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        let mut events = Vec::new();
        loop {
            match rx.recv().await {
                Ok(event) if &event.batch_id == id => {
                    let done = event.status.is_terminal();
                    events.push(event);
                    if done {
                        return WaitResult::Finished(events);
                    }
                }
                Ok(_) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Poll history until `id` is recorded with `status`
pub async fn wait_for_history_status(
    manager: &TaskManager,
    id: &BatchId,
    status: BatchStatus,
    timeout: Duration,
) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            if let Ok(Some(entry)) = manager.history_entry(id).await
                && entry.status == status
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

/// Every regular file under `root`, relative to it and sorted
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}
