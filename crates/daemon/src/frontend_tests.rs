// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::io::Read;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "testboundary";

struct Harness {
    _dir: TempDir,
    ctx: Arc<FrontendCtx>,
}

impl Harness {
    fn new(num_images: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let layout = SceneLayout::new(dir.path(), "test");
        layout.ensure_dirs().unwrap();
        let ctx = Arc::new(FrontendCtx {
            session: Arc::new(SessionState::new(num_images)),
            layout,
        });
        Self { _dir: dir, ctx }
    }

    /// Scripted worker that answers every request with the same message.
    fn answer_requests_with(&self, message: &'static str) {
        let session = Arc::clone(&self.ctx.session);
        std::thread::spawn(move || loop {
            let _ = session.wait_request();
            session.complete(message, None);
        });
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = router(Arc::clone(&self.ctx)).oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, body.to_vec())
    }
}

fn multipart_request(metadata: Option<&str>, image: Option<(&str, &[u8])>) -> Request<Body> {
    let mut body = Vec::new();
    if let Some(meta) = metadata {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\
                 Content-Type: application/json\r\n\r\n{meta}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((name, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; \
                 filename=\"{name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/process")
        .header(
            axum::http::header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Split a multipart/mixed body into its parts' bodies.
fn split_parts(body: &[u8], content_type: &str) -> Vec<Vec<u8>> {
    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .expect("boundary in content type");
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut rest = body;
    while let Some(start) = find(rest, delimiter.as_bytes()) {
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            break;
        }
        let Some(header_end) = find(rest, b"\r\n\r\n") else {
            break;
        };
        let content_start = header_end + 4;
        let Some(end) = find(&rest[content_start..], format!("\r\n--{boundary}").as_bytes())
        else {
            break;
        };
        parts.push(rest[content_start..content_start + end].to_vec());
        rest = &rest[content_start + end..];
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[tokio::test]
async fn missing_metadata_is_rejected() {
    let harness = Harness::new(2);
    let (status, _, body) = harness.send(multipart_request(None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Metadata not provided");
}

#[tokio::test]
async fn malformed_metadata_is_rejected() {
    let harness = Harness::new(2);
    let (status, _, body) = harness
        .send(multipart_request(Some("not json"), None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().starts_with("Invalid metadata"));
}

#[tokio::test]
async fn traversal_filenames_are_rejected() {
    let harness = Harness::new(2);
    let request = multipart_request(Some(r#"{"task":null}"#), Some(("..", b"x")));
    let (status, _, _) = harness.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_image_short_circuits_without_worker() {
    let harness = Harness::new(0);
    let request = multipart_request(Some(r#"{"task":null}"#), Some(("image01.jpg", b"jpegdata")));
    let (status, content_type, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("multipart/mixed"));
    // The upload landed under its original name.
    assert!(harness
        .ctx
        .layout
        .image_dir()
        .join("image01.jpg")
        .is_file());

    let text = String::from_utf8_lossy(&body);
    assert!(
        text.contains("Please upload at least two images"),
        "body: {text}"
    );
}

#[tokio::test]
async fn completed_response_carries_message_and_zip() {
    let harness = Harness::new(2);
    harness.answer_requests_with("export finished");

    // Seed a latest export directory with two artifacts.
    let export = harness.ctx.layout.ply_root().join("iter0");
    std::fs::create_dir_all(&export).unwrap();
    std::fs::write(export.join("reconstruction.ply"), b"ply-bytes").unwrap();
    std::fs::write(export.join("cameras.txt"), b"cameras").unwrap();

    let request = multipart_request(Some(r#"{"task":"e"}"#), None);
    let (status, content_type, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let content_type = content_type.unwrap();
    assert!(content_type.starts_with("multipart/mixed; boundary="));

    let parts = split_parts(&body, &content_type);
    assert_eq!(parts.len(), 2, "expected JSON and ZIP parts");

    let json: serde_json::Value = serde_json::from_slice(&parts[0]).unwrap();
    assert_eq!(json["status"], "success");
    assert!(json["user_message"]
        .as_str()
        .unwrap()
        .contains("export finished"));
    assert_eq!(
        json["files"],
        serde_json::json!(["cameras.txt", "reconstruction.ply"])
    );

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(parts[1].clone())).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["cameras.txt", "reconstruction.ply"]);

    let mut ply = String::new();
    archive
        .by_name("reconstruction.ply")
        .unwrap()
        .read_to_string(&mut ply)
        .unwrap();
    assert_eq!(ply, "ply-bytes");
}

#[tokio::test]
async fn worker_stop_is_reported_as_error_status() {
    let harness = Harness::new(2);
    harness.ctx.session.mark_worker_exited();

    let request = multipart_request(Some(r#"{"task":"h"}"#), None);
    let (status, content_type, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let parts = split_parts(&body, &content_type.unwrap());
    let json: serde_json::Value = serde_json::from_slice(&parts[0]).unwrap();
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn metadata_accepts_legacy_order_field() {
    let meta: Metadata =
        serde_json::from_str(r#"{"task":"a x.jpg","let_colmap_choose_order":true}"#).unwrap();
    assert!(meta.let_engine_choose_order);

    let meta: Metadata =
        serde_json::from_str(r#"{"task":"a x.jpg","let_engine_choose_order":true}"#).unwrap();
    assert!(meta.let_engine_choose_order);
}
