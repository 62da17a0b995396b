//! Event pump: the single consumer of worker events.

use crate::db::HistoryStore;
use crate::types::{BatchEvent, BatchId, HistoryEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};

use super::ActiveBatch;

/// Drain worker events: persist, retire terminal batches, then broadcast
///
/// Runs until every worker sender and the manager itself are dropped.
pub(super) fn spawn_event_pump(
    mut worker_rx: mpsc::UnboundedReceiver<BatchEvent>,
    history: Arc<HistoryStore>,
    active: Arc<Mutex<HashMap<BatchId, ActiveBatch>>>,
    event_tx: broadcast::Sender<BatchEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = worker_rx.recv().await {
            match history.upsert(&HistoryEntry::from(&event)).await {
                Ok(evicted) => {
                    for id in evicted {
                        tracing::debug!(batch_id = %id, "Evicted from history");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        batch_id = %event.batch_id,
                        status = %event.status,
                        error = %e,
                        code = e.error_code(),
                        "Failed to persist batch event"
                    );
                }
            }

            if event.status.is_terminal() {
                active.lock().await.remove(&event.batch_id);
                tracing::debug!(batch_id = %event.batch_id, status = %event.status, "Batch retired");
            }

            // no subscribers is fine
            event_tx.send(event).ok();
        }

        tracing::debug!("Event pump stopped");
    });
}
