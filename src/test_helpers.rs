//! Shared test helpers: a scripted in-memory remote service and fixtures.

use crate::config::{Config, ParseOptions, RetryConfig};
use crate::error::{Error, Result};
use crate::materializer::ResultMaterializer;
use crate::remote::{
    BatchHandle, RemoteBatchStatus, RemoteFileStatus, RemoteService, RemoteServiceClient,
    RemoteState,
};
use crate::types::{BatchEvent, BatchId};
use crate::worker::WorkerContext;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

type ErrorFactory = Box<dyn Fn() -> Error + Send + Sync>;

/// In-memory [`RemoteService`] driven by a script
///
/// Without a poll script every registered file is reported done on the first
/// poll. Upload locations are `mem://upload/<index>`, result URLs
/// `mem://result/<name>`.
#[derive(Default)]
pub(crate) struct FakeRemoteService {
    remote_id: Mutex<Option<String>>,
    registered: Mutex<Vec<String>>,
    last_options: Mutex<Option<ParseOptions>>,
    extra_upload_urls: AtomicUsize,
    create_failure: Mutex<Option<ErrorFactory>>,
    upload_failures: Mutex<Option<(usize, ErrorFactory)>>,
    failing_uploads: Mutex<HashMap<usize, String>>,
    polls: Mutex<VecDeque<RemoteBatchStatus>>,
    last_poll: Mutex<Option<RemoteBatchStatus>>,
    poll_failure: Mutex<Option<ErrorFactory>>,
    poll_delay: Mutex<Duration>,
    download_failure: Mutex<Option<ErrorFactory>>,
    package: Mutex<Option<Vec<u8>>>,
    create_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl FakeRemoteService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Remote id handed out by `create_batch` (default `remote-1`)
    pub(crate) fn set_remote_id(&self, id: &str) {
        *self.remote_id.lock().unwrap() = Some(id.to_string());
    }

    pub(crate) fn fail_create(&self, error: impl Fn() -> Error + Send + Sync + 'static) {
        *self.create_failure.lock().unwrap() = Some(Box::new(error));
    }

    /// The next `count` upload calls fail with `error`
    pub(crate) fn fail_uploads(&self, count: usize, error: impl Fn() -> Error + Send + Sync + 'static) {
        *self.upload_failures.lock().unwrap() = Some((count, Box::new(error)));
    }

    /// Uploads to location `index` always fail permanently
    pub(crate) fn reject_upload(&self, index: usize, message: &str) {
        self.failing_uploads
            .lock()
            .unwrap()
            .insert(index, message.to_string());
    }

    /// Responses for successive polls; the last one repeats
    pub(crate) fn script_polls(&self, polls: Vec<RemoteBatchStatus>) {
        *self.polls.lock().unwrap() = polls.into();
    }

    pub(crate) fn fail_polls(&self, error: impl Fn() -> Error + Send + Sync + 'static) {
        *self.poll_failure.lock().unwrap() = Some(Box::new(error));
    }

    pub(crate) fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_downloads(&self, error: impl Fn() -> Error + Send + Sync + 'static) {
        *self.download_failure.lock().unwrap() = Some(Box::new(error));
    }

    /// Bytes returned by every download (default: a zip holding `full.md`)
    pub(crate) fn set_package(&self, bytes: Vec<u8>) {
        *self.package.lock().unwrap() = Some(bytes);
    }

    /// Hand out `count` more upload URLs than files registered
    pub(crate) fn add_upload_urls(&self, count: usize) {
        self.extra_upload_urls.store(count, Ordering::SeqCst);
    }

    /// Options passed to the most recent `create_batch`
    pub(crate) fn last_options(&self) -> Option<ParseOptions> {
        self.last_options.lock().unwrap().clone()
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn next_poll(&self) -> RemoteBatchStatus {
        if let Some(next) = self.polls.lock().unwrap().pop_front() {
            *self.last_poll.lock().unwrap() = Some(next.clone());
            return next;
        }
        if let Some(last) = self.last_poll.lock().unwrap().clone() {
            return last;
        }
        let registered = self.registered.lock().unwrap().clone();
        listing(
            &registered
                .iter()
                .map(|name| (name.as_str(), RemoteState::Done))
                .collect::<Vec<_>>(),
        )
    }
}

#[async_trait]
impl RemoteService for FakeRemoteService {
    async fn create_batch(&self, names: &[String], options: &ParseOptions) -> Result<BatchHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        if let Some(error) = self.create_failure.lock().unwrap().as_ref() {
            return Err(error());
        }

        *self.registered.lock().unwrap() = names.to_vec();
        let remote_id = self
            .remote_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "remote-1".to_string());

        Ok(BatchHandle {
            remote_id,
            upload_urls: (0..names.len() + self.extra_upload_urls.load(Ordering::SeqCst))
                .map(|i| format!("mem://upload/{i}"))
                .collect(),
        })
    }

    async fn upload_file(&self, location: &str, _path: &Path) -> Result<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);

        if let Some((remaining, error)) = self.upload_failures.lock().unwrap().as_mut()
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(error());
        }

        let index: usize = location
            .rsplit('/')
            .next()
            .and_then(|i| i.parse().ok())
            .unwrap_or(usize::MAX);
        if let Some(message) = self.failing_uploads.lock().unwrap().get(&index) {
            return Err(Error::Permanent(message.clone()));
        }

        Ok(())
    }

    async fn poll_status(&self, _remote_id: &str) -> Result<RemoteBatchStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.poll_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.poll_failure.lock().unwrap().as_ref() {
            return Err(error());
        }

        Ok(self.next_poll())
    }

    async fn download_result(&self, _url: &str) -> Result<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.download_failure.lock().unwrap().as_ref() {
            return Err(error());
        }

        Ok(self
            .package
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| zip_package(&[("full.md", b"# parsed")])))
    }
}

/// Remote listing with `mem://result/<name>` URLs on finished files
pub(crate) fn listing(entries: &[(&str, RemoteState)]) -> RemoteBatchStatus {
    RemoteBatchStatus {
        files: entries
            .iter()
            .map(|(name, state)| {
                let mut file = RemoteFileStatus::new(*name, *state);
                if *state == RemoteState::Done {
                    file.result_url = Some(format!("mem://result/{name}"));
                }
                file
            })
            .collect(),
    }
}

/// Zip archive holding `entries`
pub(crate) fn zip_package(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Retry policy with millisecond delays
pub(crate) fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Worker context over `fake` with a 10 ms poll interval
pub(crate) fn worker_context(fake: Arc<FakeRemoteService>, output_root: &Path) -> WorkerContext {
    WorkerContext {
        client: RemoteServiceClient::new(fake, fast_retry(3), Duration::from_secs(5)),
        materializer: ResultMaterializer::new("full.md"),
        options: ParseOptions::default(),
        output_root: output_root.to_path_buf(),
        poll_interval: Duration::from_millis(10),
    }
}

/// Config rooted in `dir` with fast polling and retries
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("history.db");
    config.output.output_dir = dir.join("output");
    config.polling.interval = Duration::from_millis(10);
    config.retry = fast_retry(3);
    config
}

/// Create small placeholder PDFs in `dir`
pub(crate) fn write_pdfs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, b"%PDF-1.7\n%test\n").unwrap();
            path
        })
        .collect()
}

/// Receive events for `batch_id` up to and including its terminal event
pub(crate) async fn events_until_terminal(
    rx: &mut broadcast::Receiver<BatchEvent>,
    batch_id: &BatchId,
) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            if &event.batch_id != batch_id {
                continue;
            }
            let terminal = event.status.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("batch did not reach a terminal state in time");
    events
}
