//! HTTP API tests against the router, without binding a socket.

mod common;

use axum::body::{to_bytes, Body, HttpBody};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use common::*;
use sitrep::SitrepServer;

const BOUNDARY: &str = "sitrep-test-boundary";

fn router(harness: &TestHarness) -> Router {
    SitrepServer::new(harness.service.clone()).build_router()
}

fn upload_request(field: &str, filename: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\r\n{content}\r\n--{b}--\r\n",
        b = BOUNDARY,
    );
    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

/// True if the SSE body carries an event with this name.
fn has_event(stream: &str, name: &str) -> bool {
    stream
        .lines()
        .filter_map(|line| line.strip_prefix("event:"))
        .any(|value| value.trim() == name)
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(router, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let harness = TestHarness::new();
    let (status, body) = send_json(&router(&harness), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["jobs"]["completed"], 0);
}

#[tokio::test]
async fn test_upload_to_download() {
    let harness = TestHarness::new();
    let router = router(&harness);

    let (status, body) = send_json(&router, upload_request("file", "export.csv", EXPORT_CSV)).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    // The stream ends after `finished`, so the whole body can be read.
    let (status, stream) = send(&router, get(&format!("/api/progress-stream/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    let stream = String::from_utf8(stream).unwrap();
    assert!(has_event(&stream, "connected"), "{}", stream);
    assert!(has_event(&stream, "finished"), "{}", stream);
    assert!(stream.contains("\"status\":\"completed\""), "{}", stream);

    let (status, record) = send_json(&router, get(&format!("/api/status/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "completed");
    assert_eq!(record["progress"], 100);
    assert_eq!(record["steps"].as_array().unwrap().len(), 5);
    assert!(record["steps"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["state"] == "done"));

    let (status, stats) = send_json(&router, get(&format!("/api/stats/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalItems"], 3);
    assert_eq!(stats["removedDuplicates"], 1);

    let (status, data) = send_json(&router, get(&format!("/api/data/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["domestic"][0]["title"], "Flood warning");
    assert_eq!(data["foreign"][0]["source_name"], "Wire");
    assert_eq!(data["foreign"].as_array().unwrap().len(), 1);

    let response = router
        .clone()
        .oneshot(get(&format!("/api/download/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains(&job_id));
    let document = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&document).contains("Flood warning"));

    let (_, jobs) = send_json(&router, get("/api/jobs")).await;
    assert_eq!(jobs["counts"]["completed"], 1);
    assert_eq!(jobs["jobs"][0]["jobId"], job_id.as_str());
}

#[tokio::test]
async fn test_upload_rejections() {
    let harness = TestHarness::new();
    let router = router(&harness);

    let (status, body) = send_json(&router, upload_request("file", "export.xlsx", EXPORT_CSV)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    let (status, _) = send_json(&router, upload_request("attachment", "export.csv", EXPORT_CSV)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(harness.service.jobs().is_empty());
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let harness = TestHarness::build(|c| c.storage.max_upload_bytes = 64, None);
    let router = router(&harness);

    let (status, _) = send(&router, upload_request("file", "export.csv", EXPORT_CSV)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(harness.service.jobs().is_empty());
}

#[tokio::test]
async fn test_declared_length_over_limit_is_payload_too_large() {
    let harness = TestHarness::build(|c| c.storage.max_upload_bytes = 64, None);
    let router = router(&harness);

    let mut request = upload_request("file", "export.csv", &"x".repeat(256 * 1024));
    let length = request.body().size_hint().exact().unwrap();
    request
        .headers_mut()
        .insert(header::CONTENT_LENGTH, length.to_string().parse().unwrap());

    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(harness.service.jobs().is_empty());

    // Other routes are not affected by the upload limit.
    let (status, _) = send(&router, get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_job_returns_not_found() {
    let harness = TestHarness::new();
    let router = router(&harness);

    for uri in [
        "/api/status/missing",
        "/api/progress-stream/missing",
        "/api/stats/missing",
        "/api/data/missing",
        "/api/download/missing",
    ] {
        let (status, body) = send_json(&router, get(uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["kind"], "not_found");
    }
}

#[tokio::test]
async fn test_failed_job_has_no_stats() {
    let harness = TestHarness::new();
    let router = router(&harness);

    let (_, body) = send_json(&router, upload_request("file", "empty.csv", EMPTY_CSV)).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    let (_, stream) = send(&router, get(&format!("/api/progress-stream/{}", job_id))).await;
    let stream = String::from_utf8(stream).unwrap();
    assert!(has_event(&stream, "error"), "{}", stream);

    let (status, record) = send_json(&router, get(&format!("/api/status/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "failed");
    assert_eq!(record["stage"], "error");
    assert_eq!(record["failedStage"], "intake");
    assert_eq!(record["steps"][0]["state"], "failed");

    let (status, _) = send_json(&router, get(&format!("/api/stats/{}", job_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(&router, get(&format!("/api/data/{}", job_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
