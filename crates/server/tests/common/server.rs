//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use pyre_core::config::AppConfig;
use pyre_metadata::{ArtifactStore, JsonFileStore};
use pyre_server::{AppState, create_router};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server over temporary directories.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);

        let store: Arc<dyn ArtifactStore> = Arc::new(
            JsonFileStore::new(config.storage.data_dir.clone())
                .await
                .expect("Failed to create metadata store"),
        );

        let state = AppState::new(config, store);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        self.state.store.clone()
    }

    /// Upload `data` in chunks of `chunk_size` bytes, sending chunk numbers in
    /// `order` (1-based; defaults to ascending). Returns the upload id.
    pub async fn upload(
        &self,
        file_name: &str,
        data: &[u8],
        chunk_size: usize,
        order: Option<Vec<u32>>,
    ) -> String {
        let (status, body) = json_request(
            &self.router,
            "POST",
            "/v1/uploads",
            Some(serde_json::json!({"fileName": file_name, "fileSize": data.len()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "init failed: {body}");
        let upload_id = body["uploadId"].as_str().unwrap().to_string();

        let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
        let total = chunks.len() as u32;
        let order = order.unwrap_or_else(|| (1..=total).collect());
        for number in order {
            let (status, body) = self
                .put_chunk(
                    &upload_id,
                    number,
                    total,
                    file_name,
                    data.len() as u64,
                    Bytes::copy_from_slice(chunks[(number - 1) as usize]),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "chunk {number} failed: {body}");
        }
        upload_id
    }

    /// Send one raw chunk.
    pub async fn put_chunk(
        &self,
        upload_id: &str,
        chunk_number: u32,
        total_chunks: u32,
        file_name: &str,
        file_size: u64,
        data: Bytes,
    ) -> (StatusCode, Value) {
        let uri = format!(
            "/v1/uploads/{upload_id}/chunks/{chunk_number}?totalChunks={total_chunks}&fileName={file_name}&fileSize={file_size}"
        );
        let request = Request::builder()
            .method("PUT")
            .uri(uri)
            .header("Content-Type", "application/octet-stream")
            .body(Body::from(data))
            .unwrap();
        send(&self.router, request).await
    }

    /// Poll upload status until it reports completed.
    pub async fn wait_for_merge(&self, upload_id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (status, body) =
                json_request(&self.router, "GET", &format!("/v1/uploads/{upload_id}"), None).await;
            if status == StatusCode::OK && body["completed"] == true {
                return body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "upload {upload_id} never completed: {status} {body}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Upload, merge and store metadata for a file artifact. Returns its id.
    pub async fn store_file(&self, file_name: &str, data: &[u8], chunk_size: usize) -> String {
        let upload_id = self.upload(file_name, data, chunk_size, None).await;
        self.wait_for_merge(&upload_id).await;

        let (status, body) = json_request(
            &self.router,
            "POST",
            "/v1/artifacts/files",
            Some(serde_json::json!({
                "id": upload_id,
                "iv": "aXY=",
                "salt": "c2FsdA==",
                "originalFilename": file_name,
                "contentType": "application/octet-stream",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "store failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }
}

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    send(router, builder.body(body).unwrap()).await
}

/// Send a request and decode the response body as JSON (`Null` when empty or not JSON).
#[allow(dead_code)]
pub async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Send a request and return the raw response parts.
#[allow(dead_code)]
pub async fn raw_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}
