use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use sluice_hash::HashAlgo;

use crate::config::ServerSection;
use crate::driver::testing::{MemDriver, StoredObject};
use crate::state::AppState;

pub const TEST_TOKEN: &str = "test-token";

/// Create a wired-up router and AppState over an in-memory driver, with
/// staging directories inside a temp dir.
pub fn setup_app() -> (Router, AppState, Arc<MemDriver>, tempfile::TempDir) {
    setup_app_with(|_| {})
}

pub fn setup_app_with(
    adjust: impl FnOnce(&mut ServerSection),
) -> (Router, AppState, Arc<MemDriver>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("create tempdir");
    let mut config = ServerSection {
        temp_dir: tmp.path().join("temp").to_string_lossy().into_owned(),
        data_dir: tmp.path().join("data").to_string_lossy().into_owned(),
        token: TEST_TOKEN.to_string(),
        ..Default::default()
    };
    adjust(&mut config);

    let driver = Arc::new(MemDriver::new());
    let state = AppState::new(config, driver.clone());
    let router = super::router(state.clone());
    (router, state, driver, tmp)
}

/// Send an authenticated request with arbitrary extra headers.
pub async fn request(
    router: Router,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> axum::response::Response {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("Authorization", format!("Bearer {TEST_TOKEN}"))
        .header("Content-Length", body.len().to_string());
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(Body::from(body)).unwrap();
    router.oneshot(req).await.unwrap()
}

/// Read the full response body into `Vec<u8>`.
pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("collect body")
        .to_vec()
}

/// Parse the response body as JSON.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("parse json body")
}

/// Assert response has expected status.
pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "expected {expected}, got {}",
        response.status()
    );
}

pub const MULTIPART_BOUNDARY: &str = "sluice-test-boundary";

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}")
}

/// Assemble a multipart body with a single `file` part.
pub fn multipart_file_body(data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"chunk\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

/// Upload one slice through the chunk endpoint.
pub async fn upload_chunk(
    router: Router,
    upload_id: &str,
    index: u64,
    data: &[u8],
    crc32: Option<&str>,
) -> axum::response::Response {
    let path = format!("/fs/put/chunk?upload_id={upload_id}&index={index}");
    let content_type = multipart_content_type();
    let mut headers: Vec<(&str, &str)> = vec![("Content-Type", &content_type)];
    if let Some(crc) = crc32 {
        headers.push(("X-Chunk-CRC32", crc));
    }
    request(router, "PUT", &path, &headers, multipart_file_body(data)).await
}

pub fn crc32_hex(data: &[u8]) -> String {
    let mut digest = HashAlgo::Crc32.hasher();
    digest.update(data);
    digest.finish()
}

/// Pre-populate the in-memory driver with an object.
pub fn seed_object(driver: &MemDriver, path: &str, data: &[u8]) {
    driver.objects.insert(
        path.to_string(),
        StoredObject {
            data: data.to_vec(),
            declared_size: data.len() as i64,
            mimetype: "application/octet-stream".to_string(),
            modified: chrono::Utc::now(),
        },
    );
}
