//! HTTP transport for the MinerU batch API

use super::{BatchHandle, CredentialSource, RemoteBatchStatus, RemoteFileStatus, RemoteService, RemoteState};
use crate::config::{ApiConfig, ParseOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// Which request a response belongs to; status codes mean different things
/// on different endpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Endpoint {
    Create,
    Upload,
    Poll,
    Download,
}

impl Endpoint {
    fn describe(self) -> &'static str {
        match self {
            Endpoint::Create => "create batch",
            Endpoint::Upload => "upload",
            Endpoint::Poll => "poll",
            Endpoint::Download => "download",
        }
    }
}

/// [`RemoteService`] over HTTPS
///
/// Requests to the API carry `Authorization: Bearer <key>`; uploads and
/// downloads go to pre-signed URLs and carry no credential.
pub struct HttpRemoteService {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpRemoteService {
    /// Create a transport for the API at `config.base_url`
    ///
    /// # Errors
    /// Returns `Config` if the base URL does not parse, `Other` if the HTTP
    /// client cannot be built.
    pub fn new(config: &ApiConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        url::Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid API base URL '{}': {}", config.base_url, e),
            key: Some("api.base_url".to_string()),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("mineru-batch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn bearer(&self) -> Result<String> {
        self.credentials
            .api_key()
            .map(|key| format!("Bearer {key}"))
            .ok_or_else(|| Error::Auth("no API key configured".to_string()))
    }

    /// Read an API envelope, turning HTTP and `code != 0` failures into errors
    async fn read_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: Endpoint,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(endpoint, status, &body));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| transport_error(endpoint, e))?;

        if envelope.code != 0 {
            return Err(Error::Permanent(format!(
                "{} rejected (code {}): {}",
                endpoint.describe(),
                envelope.code,
                envelope.msg
            )));
        }

        envelope.data.ok_or_else(|| {
            Error::Permanent(format!("{} response has no data", endpoint.describe()))
        })
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn create_batch(&self, names: &[String], options: &ParseOptions) -> Result<BatchHandle> {
        let options = options.clone().normalized();
        let body = CreateBatchRequest {
            enable_formula: options.enable_formula,
            enable_table: options.enable_table,
            language: &options.language,
            files: names
                .iter()
                .map(|name| FileSpec {
                    name,
                    is_ocr: options.is_ocr,
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.endpoint("file-urls/batch"))
            .header(AUTHORIZATION, self.bearer()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Endpoint::Create, e))?;

        let created: CreatedBatch = Self::read_envelope(response, Endpoint::Create).await?;
        if created.file_urls.len() != names.len() {
            return Err(Error::Permanent(format!(
                "remote returned {} upload URLs for {} files",
                created.file_urls.len(),
                names.len()
            )));
        }

        tracing::debug!(remote_id = %created.batch_id, files = names.len(), "Batch registered");

        Ok(BatchHandle {
            remote_id: created.batch_id,
            upload_urls: created.file_urls,
        })
    }

    async fn upload_file(&self, location: &str, path: &Path) -> Result<()> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .put(location)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(Endpoint::Upload, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(Endpoint::Upload, status, &text));
        }

        tracing::debug!(path = %path.display(), bytes = size, "File uploaded");
        Ok(())
    }

    async fn poll_status(&self, remote_id: &str) -> Result<RemoteBatchStatus> {
        let response = self
            .client
            .get(self.endpoint(&format!("extract-results/batch/{remote_id}")))
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .await
            .map_err(|e| transport_error(Endpoint::Poll, e))?;

        let results: BatchResults = Self::read_envelope(response, Endpoint::Poll).await?;

        Ok(RemoteBatchStatus {
            files: results
                .extract_result
                .into_iter()
                .map(ExtractResult::into_status)
                .collect(),
        })
    }

    async fn download_result(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(Endpoint::Download, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(Endpoint::Download, status, &text));
        }

        let mut package = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| transport_error(Endpoint::Download, e))?;
            package.extend_from_slice(&chunk);
        }

        Ok(package)
    }
}

/// Map a non-success HTTP status to the error taxonomy
fn classify_status(endpoint: Endpoint, status: StatusCode, body: &str) -> Error {
    let detail = if body.trim().is_empty() {
        format!("{} returned HTTP {}", endpoint.describe(), status)
    } else {
        format!(
            "{} returned HTTP {}: {}",
            endpoint.describe(),
            status,
            body.trim()
        )
    };

    match (endpoint, status.as_u16()) {
        (Endpoint::Download, 403 | 404 | 410) => Error::Expired(detail),
        (_, 401 | 403) => Error::Auth(detail),
        (Endpoint::Create, 400 | 422) => Error::Validation(detail),
        (Endpoint::Poll, 404) => Error::NotFound(detail),
        (_, 408 | 429) => Error::Transient(detail),
        (_, code) if (500..600).contains(&code) => Error::Transient(detail),
        _ => Error::Permanent(detail),
    }
}

fn transport_error(endpoint: Endpoint, e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::Transient(format!("{} failed: {}", endpoint.describe(), e))
    } else if e.is_decode() {
        Error::Permanent(format!("{} returned an unreadable body: {}", endpoint.describe(), e))
    } else {
        Error::Network(e)
    }
}

#[derive(Serialize)]
struct CreateBatchRequest<'a> {
    enable_formula: bool,
    enable_table: bool,
    language: &'a str,
    files: Vec<FileSpec<'a>>,
}

#[derive(Serialize)]
struct FileSpec<'a> {
    name: &'a str,
    is_ocr: bool,
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct CreatedBatch {
    batch_id: String,
    #[serde(default)]
    file_urls: Vec<String>,
}

#[derive(Deserialize)]
struct BatchResults {
    #[serde(default)]
    extract_result: Vec<ExtractResult>,
}

#[derive(Deserialize)]
struct ExtractResult {
    file_name: String,
    #[serde(default)]
    state: String,
    full_zip_url: Option<String>,
    err_msg: Option<String>,
    extract_progress: Option<ExtractProgress>,
}

#[derive(Deserialize)]
struct ExtractProgress {
    extracted_pages: Option<u32>,
    total_pages: Option<u32>,
}

impl ExtractResult {
    fn into_status(self) -> RemoteFileStatus {
        let (extracted_pages, total_pages) = self
            .extract_progress
            .map(|p| (p.extracted_pages, p.total_pages))
            .unwrap_or((None, None));

        RemoteFileStatus {
            state: RemoteState::parse(&self.state),
            file_name: self.file_name,
            result_url: self.full_zip_url.filter(|u| !u.is_empty()),
            error: self.err_msg.filter(|m| !m.is_empty()),
            extracted_pages,
            total_pages,
        }
    }
}
