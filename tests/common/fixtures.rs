//! Configuration, input files and a mocked MinerU API

use mineru_batch::config::{
    ApiConfig, OutputConfig, PersistenceConfig, PollingConfig, RetryConfig, RuntimeConfig,
};
use mineru_batch::{Config, StaticCredential, TaskManager};
use serde_json::{Value, json};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// API key the mocked server expects
pub const API_KEY: &str = "sk-integration";

/// Config pointing at `server` with fast polling and retries
pub fn test_config(dir: &Path, base_url: &str) -> Config {
    Config {
        api: ApiConfig {
            base_url: base_url.to_string(),
            request_timeout: Duration::from_secs(5),
        },
        output: OutputConfig {
            output_dir: dir.join("output"),
            ..Default::default()
        },
        polling: PollingConfig {
            interval: Duration::from_millis(20),
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        persistence: PersistenceConfig {
            database_path: dir.join("history.db"),
            ..Default::default()
        },
        runtime: RuntimeConfig {
            shutdown_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Manager talking HTTP to `server` with the test API key
pub async fn create_manager(server: &MockServer) -> (TaskManager, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let manager = TaskManager::with_credentials(
        test_config(dir.path(), &server.uri()),
        Arc::new(StaticCredential::new(API_KEY)),
    )
    .await
    .expect("manager");
    (manager, dir)
}

/// Write small PDF-looking files named `names` into `dir`
pub fn write_pdfs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, format!("%PDF-1.7 {name}")).expect("write pdf");
            path
        })
        .collect()
}

/// Zip archive holding `entries`
pub fn zip_package(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(content).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// `{code: 0, data}` API envelope
pub fn envelope(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"code": 0, "msg": "ok", "data": data}))
}

/// Mount the create endpoint handing out `<server>/upload/<name>` URLs
pub async fn mount_create(server: &MockServer, remote_id: &str, names: &[&str]) {
    let urls: Vec<String> = names
        .iter()
        .map(|name| format!("{}/upload/{}", server.uri(), name))
        .collect();
    Mock::given(method("POST"))
        .and(path("/file-urls/batch"))
        .respond_with(envelope(json!({"batch_id": remote_id, "file_urls": urls})))
        .mount(server)
        .await;
}

/// Accept uploads of `names`
pub async fn mount_uploads(server: &MockServer, names: &[&str]) {
    for name in names {
        Mock::given(method("PUT"))
            .and(path(format!("/upload/{name}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }
}

/// Mount the status endpoint: `running_polls` running answers, then done
/// with `<server>/results/<name>.zip` URLs
pub async fn mount_status(server: &MockServer, remote_id: &str, names: &[&str], running_polls: u64) {
    let route = format!("/extract-results/batch/{remote_id}");

    if running_polls > 0 {
        let running: Vec<Value> = names
            .iter()
            .map(|name| {
                json!({
                    "file_name": name,
                    "state": "running",
                    "extract_progress": {"extracted_pages": 1, "total_pages": 4}
                })
            })
            .collect();
        Mock::given(method("GET"))
            .and(path(route.clone()))
            .respond_with(envelope(json!({"batch_id": remote_id, "extract_result": running})))
            .up_to_n_times(running_polls)
            .with_priority(1)
            .mount(server)
            .await;
    }

    let done: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({
                "file_name": name,
                "state": "done",
                "full_zip_url": format!("{}/results/{}.zip", server.uri(), name)
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(envelope(json!({"batch_id": remote_id, "extract_result": done})))
        .mount(server)
        .await;
}

/// Serve `package` as the result of `name`
pub async fn mount_result(server: &MockServer, name: &str, package: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/results/{name}.zip")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(package))
        .mount(server)
        .await;
}
