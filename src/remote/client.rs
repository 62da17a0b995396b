//! Retrying, time-bounded access to a [`RemoteService`]

use super::{BatchHandle, RemoteBatchStatus, RemoteService};
use crate::config::{ParseOptions, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wraps a transport with the retry policy and a per-call timeout
///
/// Every call is retried on transient failures only. A call that exceeds the
/// timeout counts as transient. Retry backoff ends early when the batch's
/// cancellation token fires; the last error is returned in that case.
#[derive(Clone)]
pub struct RemoteServiceClient {
    service: Arc<dyn RemoteService>,
    retry: RetryConfig,
    timeout: Duration,
}

impl RemoteServiceClient {
    /// Create a client over `service`
    pub fn new(service: Arc<dyn RemoteService>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            service,
            retry,
            timeout,
        }
    }

    /// Register a batch for `names`
    pub async fn create_batch(
        &self,
        names: &[String],
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> Result<BatchHandle> {
        with_retry(&self.retry, cancel, move || {
            self.bounded("create batch", self.service.create_batch(names, options))
        })
        .await
    }

    /// Upload one file
    pub async fn upload_file(
        &self,
        location: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        with_retry(&self.retry, cancel, move || {
            self.bounded("upload", self.service.upload_file(location, path))
        })
        .await
    }

    /// Poll the remote state of a batch
    pub async fn poll_status(
        &self,
        remote_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteBatchStatus> {
        with_retry(&self.retry, cancel, move || {
            self.bounded("poll", self.service.poll_status(remote_id))
        })
        .await
    }

    /// Download a result package
    pub async fn download_result(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        with_retry(&self.retry, cancel, move || {
            self.bounded("download", self.service.download_result(url))
        })
        .await
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transient(format!(
                "{} timed out after {}s",
                what,
                self.timeout.as_secs_f64()
            ))),
        }
    }
}
