//! Router-level tests against the in-memory store with instant fakes.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use pagesmith_core::config::EngineConfig;
use pagesmith_core::convert::{ConvertOutput, DocumentConverter, PageSplitter, SourceFetcher};
use pagesmith_core::error::{EngineError, EngineResult};
use pagesmith_core::job::{ConvertOptions, SourceSpec};
use pagesmith_core::queue::memory::MemoryQueue;
use pagesmith_core::store::memory::MemoryStore;
use pagesmith_core::{Orchestrator, WorkerPool};

use pagesmith_server::server::router;
use pagesmith_server::{AppState, ServerConfig};

struct PassthroughFetcher;

#[async_trait]
impl SourceFetcher for PassthroughFetcher {
    async fn fetch(&self, source: &SourceSpec, _dest_dir: &Path) -> EngineResult<PathBuf> {
        match source {
            SourceSpec::Upload { path, .. } | SourceSpec::LocalPath { path } => Ok(path.clone()),
            SourceSpec::Url { url } => Err(EngineError::FetchFailed(format!(
                "no network in tests: {url}"
            ))),
        }
    }
}

struct EchoConverter;

#[async_trait]
impl DocumentConverter for EchoConverter {
    async fn convert(
        &self,
        path: &Path,
        _options: &ConvertOptions,
    ) -> EngineResult<ConvertOutput> {
        let markdown = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| EngineError::ConvertFailed(err.to_string()))?;
        Ok(ConvertOutput {
            markdown,
            title: None,
            author: None,
        })
    }
}

struct SinglePageSplitter;

#[async_trait]
impl PageSplitter for SinglePageSplitter {
    async fn page_count(&self, _path: &Path) -> EngineResult<u32> {
        Ok(1)
    }

    async fn split(&self, _path: &Path, _out_dir: &Path) -> EngineResult<Vec<PathBuf>> {
        Err(EngineError::SplitFailed("not used in these tests".into()))
    }
}

struct TestServer {
    app: Router,
    _dir: TempDir,
}

fn test_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let mut config = ServerConfig::default();
    config.engine = EngineConfig {
        spool_dir: dir.path().join("spool"),
        queue_retry_base_seconds: 0,
        ..EngineConfig::default()
    };

    let store = Arc::new(MemoryStore::new(config.engine.status_ttl()));
    let queue = Arc::new(MemoryQueue::new(config.engine.retry_policy()));
    let engine = Arc::new(Orchestrator::new(
        store.clone(),
        queue.clone(),
        Arc::new(PassthroughFetcher),
        Arc::new(EchoConverter),
        Arc::new(SinglePageSplitter),
        config.engine.clone(),
    ));
    let pool = WorkerPool::spawn(engine.clone(), queue.clone(), 1);
    let workers = pool.worker_count();
    // The pool lives for the whole test process.
    std::mem::forget(pool);

    let state = AppState::new(engine, store, config, workers);
    TestServer {
        app: router(state),
        _dir: dir,
    }
}

fn multipart_body(filename: &str, content: &str) -> (String, String) {
    let boundary = "PAGESMITH-TEST-BOUNDARY".to_string();
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         {content}\r\n\
         --{boundary}--\r\n"
    );
    (boundary, body)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

fn upload_request(api_key: &str, filename: &str, content: &str) -> Request<Body> {
    let (boundary, body) = multipart_body(filename, content);
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header("x-api-key", api_key)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get_request(api_key: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-api-key", api_key)
        .body(Body::empty())
        .unwrap()
}

async fn await_status(app: &Router, api_key: &str, job_id: &str, wanted: &str) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let (status, body) = send(app, get_request(api_key, &format!("/jobs/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == wanted {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "job stuck at {}",
            body["status"]
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_missing_api_key_is_unauthorized() {
    let server = test_server();
    let request = Request::builder()
        .method("GET")
        .uri("/jobs")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&server.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "auth");
}

#[tokio::test]
async fn test_unsupported_extension_is_rejected() {
    let server = test_server();
    let (status, body) = send(&server.app, upload_request("k1", "virus.xyz", "hello")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation");

    // nothing was created
    let (status, body) = send(&server.app, get_request("k1", "/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let server = test_server();
    let (status, body) = send(&server.app, upload_request("k1", "empty.html", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test]
async fn test_upload_convert_and_fetch_result() {
    let server = test_server();
    let (status, body) = send(
        &server.app,
        upload_request("k1", "note.html", "<h1>hello</h1>"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    await_status(&server.app, "k1", &job_id, "completed").await;

    let (status, body) = send(
        &server.app,
        get_request("k1", &format!("/jobs/{job_id}/result")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["markdown"], "<h1>hello</h1>");
    assert_eq!(body["metadata"]["pages"], 1);

    // single-pass conversion has no page listing
    let (status, _) = send(
        &server.app,
        get_request("k1", &format!("/jobs/{job_id}/pages")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // and retrying a page of it is a 404 as well
    let retry = Request::builder()
        .method("POST")
        .uri(format!("/jobs/{job_id}/pages/1/retry"))
        .header("x-api-key", "k1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&server.app, retry).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_result_not_ready_is_bad_request() {
    let server = test_server();
    // a convert request with an unreachable url never completes
    let request = Request::builder()
        .method("POST")
        .uri("/convert")
        .header("x-api-key", "k1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({
                "source_type": "path",
                "source": "/nonexistent/report.pdf"
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(&server.app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // poll the job; while queued/processing the result read is a 400,
    // once the missing file dead-letters the job it turns into a 500
    let (status, body) = send(
        &server.app,
        get_request("k1", &format!("/jobs/{job_id}/result")),
    )
    .await;
    assert!(
        status == StatusCode::BAD_REQUEST || status == StatusCode::INTERNAL_SERVER_ERROR,
        "unexpected status {status}: {body}"
    );
}

#[tokio::test]
async fn test_invalid_url_scheme_is_rejected() {
    let server = test_server();
    let request = Request::builder()
        .method("POST")
        .uri("/convert")
        .header("x-api-key", "k1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({
                "source_type": "url",
                "source": "ftp://example.com/doc.pdf"
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(&server.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test]
async fn test_cross_owner_reads_are_not_found() {
    let server = test_server();
    let (_, body) = send(
        &server.app,
        upload_request("k1", "doc.html", "<p>mine</p>"),
    )
    .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    await_status(&server.app, "k1", &job_id, "completed").await;

    let (status, body) = send(&server.app, get_request("k2", &format!("/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(
        &server.app,
        get_request("k2", &format!("/jobs/{job_id}/result")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // the other owner's listing stays empty
    let (_, body) = send(&server.app, get_request("k2", "/jobs")).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_delete_then_gone() {
    let server = test_server();
    let (_, body) = send(
        &server.app,
        upload_request("k1", "doc.html", "<p>bye</p>"),
    )
    .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    await_status(&server.app, "k1", &job_id, "completed").await;

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/jobs/{job_id}"))
        .header("x-api-key", "k1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&server.app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&server.app, get_request("k1", &format!("/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_store_and_workers() {
    let server = test_server();
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&server.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "ok");
    assert_eq!(body["workers"], 1);
}
