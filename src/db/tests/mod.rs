use crate::db::HistoryStore;
use crate::types::{BatchId, BatchStatus, FileStatus, HistoryEntry, UploadFile};
use chrono::{Duration, Utc};
use tempfile::NamedTempFile;


fn entry(id: &str, status: BatchStatus, age_secs: i64) -> HistoryEntry {
    let updated_at = Utc::now() - Duration::seconds(age_secs);
    let mut file = UploadFile::new(format!("/papers/{id}.pdf"));
    if status == BatchStatus::Completed {
        file.status = FileStatus::Done;
    }
    HistoryEntry {
        batch_id: BatchId::from(id),
        remote_id: Some(format!("remote-{id}")),
        status,
        files: vec![file],
        output_dir: None,
        error: None,
        created_at: updated_at,
        updated_at,
    }
}

async fn open_store(limit: usize) -> (NamedTempFile, HistoryStore) {
    let temp_file = NamedTempFile::new().unwrap();
    let store = HistoryStore::open(temp_file.path(), limit).await.unwrap();
    (temp_file, store)
}
