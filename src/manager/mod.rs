//! Task manager: owns the active batches, the history store and the event feed
//!
//! ## Submodules
//!
//! - [`control`]: start, cancel and resume batches
//! - [`events`]: the single event pump that persists then broadcasts
//! - [`lifecycle`]: construction, startup recovery, shutdown
//!
//! Workers never touch the history store. They send every event to one pump
//! task, which writes the history entry, drops terminal batches from the
//! active set and only then broadcasts to subscribers. History writes are
//! therefore serialized, and a subscriber that sees an event can read the
//! matching history entry.

use crate::config::Config;
use crate::db::HistoryStore;
use crate::error::Result;
use crate::types::{BatchEvent, BatchId, HistoryEntry};
use crate::worker::WorkerContext;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

mod control;
mod events;
mod lifecycle;

/// Active-set entry for one running worker
struct ActiveBatch {
    cancel: CancellationToken,
}

/// Coordinates batch workers
///
/// Cheap to clone; clones share the same workers, history and event feed.
#[derive(Clone)]
pub struct TaskManager {
    config: Arc<Config>,
    ctx: WorkerContext,
    history: Arc<HistoryStore>,
    active: Arc<Mutex<HashMap<BatchId, ActiveBatch>>>,
    /// Workers → pump
    worker_tx: mpsc::UnboundedSender<BatchEvent>,
    /// Pump → subscribers
    event_tx: broadcast::Sender<BatchEvent>,
    accepting_new: Arc<AtomicBool>,
}

impl TaskManager {
    /// Subscribe to batch events
    ///
    /// Events of one batch arrive in transition order. A subscriber that falls
    /// more than `runtime.event_buffer` events behind gets
    /// `RecvError::Lagged` and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.event_tx.subscribe()
    }

    /// Batch events as a [`Stream`]
    ///
    /// A consumer that falls more than `runtime.event_buffer` events behind
    /// loses the oldest ones; the gap is logged as a warning and the stream
    /// resumes with the oldest event still buffered. Size `event_buffer` for
    /// the slowest consumer if it must see every transition.
    pub fn event_stream(&self) -> impl Stream<Item = BatchEvent> + Send + 'static {
        use tokio_stream::StreamExt;
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream consumer lagged, events dropped");
                None
            }
        })
    }

    /// Most recent history entries first, at most `limit`
    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.history.list(limit).await
    }

    /// History entry for one batch
    pub async fn history_entry(&self, id: &BatchId) -> Result<Option<HistoryEntry>> {
        self.history.get(id).await
    }

    /// Delete a history entry; returns whether it existed
    ///
    /// Active batches keep running and will write a fresh entry on their next
    /// transition.
    pub async fn remove_history(&self, id: &BatchId) -> Result<bool> {
        self.history.remove(id).await
    }

    /// Delete all history; returns the number of entries removed
    pub async fn clear_history(&self) -> Result<u64> {
        self.history.clear().await
    }

    /// Ids of batches with a running worker
    pub async fn active_batches(&self) -> Vec<BatchId> {
        let mut ids: Vec<BatchId> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `id` has a running worker
    pub async fn is_active(&self, id: &BatchId) -> bool {
        self.active.lock().await.contains_key(id)
    }

    /// Whether any worker is running
    pub async fn has_active_batches(&self) -> bool {
        !self.active.lock().await.is_empty()
    }

    /// The configuration this manager was built with
    pub fn config(&self) -> &Config {
        &self.config
    }
}
