mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{docx_bytes, harness, FakeExtractor, FakeGraph, Harness, GRAPH_JSON};
use contract_review::server::{router, USER_HEADER};

const BOUNDARY: &str = "crv-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_request(uri: &str, user: Option<&str>, parts: &[Part<'_>]) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder.body(Body::from(multipart_body(parts))).unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn setup() -> (Harness, Router) {
    let h = harness(
        FakeExtractor::returning("# Service agreement\n\nTerm: one year."),
        FakeGraph::returning(GRAPH_JSON),
    );
    let app = router(h.app.clone());
    (h, app)
}

async fn upload_draft(app: &Router, text: &str) -> i64 {
    let bytes = docx_bytes(&[text]);
    let (status, body) = send(
        app,
        multipart_request(
            "/api/contracts/upload",
            Some("alice"),
            &[
                Part::File("file", "service.docx", &bytes),
                Part::Text("category", "services"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["data"]["contract"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (_h, app) = setup();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn upload_creates_draft_with_first_version() {
    let (_h, app) = setup();
    let bytes = docx_bytes(&["Service agreement"]);
    let (status, body) = send(
        &app,
        multipart_request(
            "/api/contracts/upload",
            None,
            &[Part::File("file", "service.docx", &bytes)],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 200);
    let contract = &body["data"]["contract"];
    assert!(contract["contract_number"]
        .as_str()
        .unwrap()
        .starts_with("DRAFT-"));
    assert_eq!(contract["contract_name"], "service");
    assert_eq!(contract["status"], 0);
    assert_eq!(contract["creator_id"], "system_auto");
    assert_eq!(body["data"]["version"]["version_number"], 1);

    let id = contract["id"].as_i64().unwrap();
    let (status, body) = send(&app, get(&format!("/api/contracts/{}/versions", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_upload_is_a_conflict_with_existing_version() {
    let (_h, app) = setup();
    let first = upload_draft(&app, "same bytes").await;

    let bytes = docx_bytes(&["same bytes"]);
    let (status, body) = send(
        &app,
        multipart_request(
            "/api/contracts/upload",
            Some("bob"),
            &[Part::File("file", "copy.docx", &bytes)],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 409);
    assert_eq!(body["data"]["contract_id"], first);
    assert_eq!(body["data"]["version_number"], 1);

    // The orphan draft was discarded.
    let (_, list) = send(&app, get("/api/contracts")).await;
    assert_eq!(list["data"]["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn text_files_are_rejected() {
    let (_h, app) = setup();
    let (status, body) = send(
        &app,
        multipart_request(
            "/api/contracts/upload",
            Some("alice"),
            &[Part::File("file", "notes.txt", b"hello")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn create_requires_a_user() {
    let (_h, app) = setup();
    let parts = [
        Part::Text("contract_number", "C-2026-001"),
        Part::Text("contract_name", "Maintenance"),
    ];
    let (status, body) = send(&app, multipart_request("/api/contracts", None, &parts)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);

    let (status, body) =
        send(&app, multipart_request("/api/contracts", Some("alice"), &parts)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["version"].is_null());

    let (status, body) = send(&app, get("/api/contracts/number/C-2026-001")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["contract_name"], "Maintenance");

    let (status, _) =
        send(&app, multipart_request("/api/contracts", Some("alice"), &parts)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_contract_is_404_in_envelope() {
    let (_h, app) = setup();
    let (status, body) = send(&app, get("/api/contracts/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
    assert!(body["message"].as_str().unwrap().contains("999"));
}

#[tokio::test]
async fn add_version_then_fetch_by_number() {
    let (_h, app) = setup();
    let id = upload_draft(&app, "original").await;
    let bytes = docx_bytes(&["amended"]);
    let (status, body) = send(
        &app,
        multipart_request(
            &format!("/api/contracts/{}/versions", id),
            Some("alice"),
            &[
                Part::File("file", "service-v2.docx", &bytes),
                Part::Text("remark", "amended term"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["version_number"], 2);
    assert_eq!(body["data"]["remark"], "amended term");

    let (_, latest) = send(&app, get(&format!("/api/contracts/{}/versions/latest", id))).await;
    assert_eq!(latest["data"]["version_number"], 2);
    let (_, first) = send(&app, get(&format!("/api/contracts/{}/versions/1", id))).await;
    assert_eq!(first["data"]["file_name"], "service.docx");

    let (status, cmp) = send(
        &app,
        get(&format!("/api/contracts/{}/compare?base=1&target=2", id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cmp["data"]["base_text"], "original");
    assert_eq!(cmp["data"]["target_text"], "amended");
    assert_eq!(cmp["data"]["diff"], "unavailable");
}

#[tokio::test]
async fn review_fills_content_and_enables_raw_export() {
    let (h, app) = setup();
    let id = upload_draft(&app, "Service agreement").await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/contracts/{}/export?format=raw", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/contracts/agent/review", json!({ "id": id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["graph"]["status"], "built");

    let (_, content) = send(&app, get(&format!("/api/contracts/{}/content", id))).await;
    assert_eq!(
        content["data"]["content"],
        "# Service agreement\n\nTerm: one year."
    );
    assert_eq!(content["data"]["knowledge_graph"], GRAPH_JSON);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/contracts/{}/export?format=raw", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"DRAFT-"));
    assert!(disposition.ends_with("_v1.md\""));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"# Service agreement\n\nTerm: one year.");

    let (_, contract) = send(&app, get(&format!("/api/contracts/{}", id))).await;
    assert_eq!(contract["data"]["status"], 1);
    assert_eq!(h.extractor.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn txt_export_and_original_file_download() {
    let (_h, app) = setup();
    let id = upload_draft(&app, "Plain body").await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/contracts/{}/export?format=txt", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Plain body");

    let response = app
        .clone()
        .oneshot(get(&format!("/api/contracts/{}/file?version=1", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.to_vec(), docx_bytes(&["Plain body"]));

    let (status, _) = send(&app, get(&format!("/api/contracts/{}/export?format=pdf", id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_moves_forward_only() {
    let (_h, app) = setup();
    let id = upload_draft(&app, "Status").await;
    let uri = format!("/api/contracts/{}/status", id);

    let (status, body) = send(&app, json_request(Method::PUT, &uri, json!({ "status": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], 2);

    let (status, body) = send(&app, json_request(Method::PUT, &uri, json!({ "status": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn delete_removes_contract_and_files() {
    let (h, app) = setup();
    let id = upload_draft(&app, "Short lived").await;
    assert_eq!(common::uploaded_files(&h.remote_root).len(), 1);

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/contracts/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["versions_removed"], 1);

    let (status, _) = send(&app, get(&format!("/api/contracts/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(common::uploaded_files(&h.remote_root).is_empty());
}

#[tokio::test]
async fn batch_upload_reports_partial_failures() {
    let (_h, app) = setup();
    let good = docx_bytes(&["batch one"]);
    let (status, body) = send(
        &app,
        multipart_request(
            "/api/contracts/batch-upload",
            Some("alice"),
            &[
                Part::File("files", "one.docx", &good),
                Part::File("files", "two.txt", b"nope"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["created"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["failed"][0]["file_name"], "two.txt");
    assert_eq!(body["data"]["failed"][0]["code"], 400);

    let (status, _) = send(
        &app,
        multipart_request(
            "/api/contracts/batch-upload",
            Some("alice"),
            &[Part::File("files", "three.txt", b"nope")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
