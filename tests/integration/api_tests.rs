//! HTTP API integration tests.
//!
//! Tests verify:
//! - Registry endpoints (register, list, get, delete)
//! - Analysis endpoints returning result envelopes
//! - Error bodies and status codes for each error kind
//! - Health reporting of loaded services

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use cxr_analysis::error::BackendError;
use cxr_analysis::geometry::HEART;
use cxr_analysis::{create_router, RouterConfig};

use super::test_utils::{block_mask, orchestrator, write_radiograph, MockModelProvider};

fn router(provider: MockModelProvider) -> Router {
    create_router(
        orchestrator(provider),
        RouterConfig::default().with_tracing(false),
    )
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

async fn register(router: &Router, path: &str) -> String {
    let (status, body) = send(router, post("/images", json!({ "image_path": path }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["image_id"].as_str().unwrap().to_string()
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn test_register_and_list() {
    let app = router(MockModelProvider::new());

    let (status, body) = send(&app, post("/images", json!({ "image_path": "/tmp/a.png" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["format"], "png");
    assert_eq!(body["message"], "Image registered successfully");
    let id = body["image_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get("/images")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["image_ids"][0], id.as_str());

    let (status, body) = send(&app, get(&format!("/images/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/tmp/a.png");
    assert_eq!(body["id"], id.as_str());
}

#[tokio::test]
async fn test_delete_image() {
    let app = router(MockModelProvider::new());
    let id = register(&app, "/tmp/a.png").await;

    let delete = |id: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/images/{}", id))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&app, delete(&id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, body) = send(&app, delete(&id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "image_not_found");
}

#[tokio::test]
async fn test_unknown_image_body() {
    let app = router(MockModelProvider::new());

    let (status, body) = send(&app, get("/images/img_000000000000")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Image not found: img_000000000000");
    assert_eq!(body["kind"], "image_not_found");
    assert_eq!(body["details"]["image_id"], "img_000000000000");
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let app = router(MockModelProvider::new());

    let (status, body) = send(&app, post("/images", json!({ "path": "/tmp/a.png" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
    assert_eq!(body["details"]["field"], "body");
}

// =============================================================================
// Analysis
// =============================================================================

#[tokio::test]
async fn test_classify_endpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, 16, 16);

    let app = router(MockModelProvider::new().with_scores(&[("Pneumonia", 0.8), ("Effusion", 0.3)]));
    let id = register(&app, path.to_str().unwrap()).await;

    let (status, body) = send(&app, post("/classify", json!({ "image_id": id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["threshold"], 0.5);
    assert_eq!(body["positive_findings"], json!({ "Pneumonia": 0.8 }));
    assert_eq!(body["top_findings"][0]["pathology"], "Pneumonia");
    assert_eq!(body["top_findings"][1]["pathology"], "Effusion");
    assert!(body.get("error").is_none());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_classify_invalid_pathology() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, 16, 16);

    let app = router(MockModelProvider::new());
    let id = register(&app, path.to_str().unwrap()).await;

    let (status, body) = send(
        &app,
        post("/classify", json!({ "image_id": id, "pathologies": ["Unicorn"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
    assert_eq!(body["details"]["field"], "pathologies");
}

#[tokio::test]
async fn test_failed_analysis_is_still_200() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, 16, 16);

    let app = router(
        MockModelProvider::new().with_call_error(BackendError::Inference("GPU OOM".into())),
    );
    let id = register(&app, path.to_str().unwrap()).await;

    let (status, body) = send(
        &app,
        post("/ask", json!({ "image_ids": [id], "question": "Any effusion?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"], "Model 'mock-chexagent' error: GPU OOM");
}

#[tokio::test]
async fn test_segment_endpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, 64, 64);

    let app = router(MockModelProvider::new().with_mask(HEART, block_mask(8..16, 10..20, 0.9)));
    let id = register(&app, path.to_str().unwrap()).await;

    let (status, body) = send(
        &app,
        post(
            "/segment",
            json!({ "image_id": id, "pixel_spacing_mm": [0.15, 0.15] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["organs_segmented"], json!(["Heart"]));
    assert_eq!(body["organ_metrics"].as_object().unwrap().len(), 1);
    assert_eq!(body["organ_metrics"]["Heart"]["bbox"], json!([16, 20, 32, 40]));
    assert_eq!(body["pixel_spacing_mm"], json!([0.15, 0.15]));
    assert_eq!(body["spacing_calibrated"], true);
    assert!(!body["visualization"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_file_is_404() {
    let app = router(MockModelProvider::new());
    let id = register(&app, "/nonexistent/cxr.png").await;

    let (status, body) = send(&app, post("/segment", json!({ "image_id": id }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["details"]["image_path"], "/nonexistent/cxr.png");
}

#[tokio::test]
async fn test_dicom_unsupported_is_415() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scan.png");
    std::fs::write(&path, b"png").unwrap();

    let app = router(MockModelProvider::new().with_dicom(dir.path(), None));

    let (status, body) = send(
        &app,
        post("/dicom/process", json!({ "dicom_path": path.to_str().unwrap() })),
    )
    .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["kind"], "unsupported_format");
    assert_eq!(body["details"]["supported_formats"], json!(["DICOM"]));
}

#[tokio::test]
async fn test_dicom_metadata_endpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("study.dcm");
    std::fs::write(&path, b"mock").unwrap();

    let app = router(MockModelProvider::new().with_dicom(dir.path(), None));

    let (status, body) = send(
        &app,
        post("/dicom/metadata", json!({ "dicom_path": path.to_str().unwrap() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["patient_id"], "ANON-001");
    assert_eq!(body["modality"], "DX");
}

// =============================================================================
// Labels and Health
// =============================================================================

#[tokio::test]
async fn test_supported_labels() {
    let app = router(MockModelProvider::new());

    let (status, body) = send(&app, get("/pathologies")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 18);

    let (status, body) = send(&app, get("/organs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 14);
    assert_eq!(body["organs"][8], "Heart");
}

#[tokio::test]
async fn test_unavailable_service_is_503() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, 16, 16);

    let app = router(
        MockModelProvider::new().failing_loads(1, BackendError::Connection("refused".into())),
    );
    let id = register(&app, path.to_str().unwrap()).await;

    let (status, body) = send(&app, get("/pathologies")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 18);

    let (status, body) = send(&app, post("/classify", json!({ "image_id": id }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "service_unavailable");
    assert_eq!(body["details"]["service"], "classification");

    let (status, body) = send(&app, post("/classify", json!({ "image_id": id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_unknown_image_is_404_even_when_backend_is_down() {
    let app = router(
        MockModelProvider::new().failing_loads(3, BackendError::Connection("refused".into())),
    );

    let (status, body) = send(
        &app,
        post("/segment", json!({ "image_id": "img_ffffffffffff" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "image_not_found");

    let (_, body) = send(&app, get("/health")).await;
    assert_eq!(body["services"]["segmentation"], false);
}

#[tokio::test]
async fn test_health_reports_loaded_services() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, 32, 32);

    let app = router(MockModelProvider::new());
    let id = register(&app, path.to_str().unwrap()).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["segmentation"], false);

    send(&app, get("/organs")).await;
    let (_, body) = send(&app, get("/health")).await;
    assert_eq!(body["services"]["segmentation"], false);

    send(&app, post("/segment", json!({ "image_id": id }))).await;

    let (_, body) = send(&app, get("/health")).await;
    assert_eq!(body["services"]["segmentation"], true);
    assert_eq!(body["services"]["classification"], false);
}
