//! Segmentation and DICOM integration tests.
//!
//! Tests verify:
//! - Only organs with activation are reported
//! - Metrics land at crop-adjusted coordinates of the original image
//! - Spacing precedence and the area scaling law
//! - DICOM rendering registers a calibrated image

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tempfile::TempDir;

use cxr_analysis::analysis::{AnalysisStatus, PixelSpacing};
use cxr_analysis::error::BackendError;
use cxr_analysis::geometry::HEART;

use super::test_utils::{block_mask, orchestrator, write_radiograph, MockModelProvider};

/// A 64x64 image is twice the 32x32 mock resolution, so every mask pixel
/// covers a 2x2 block of the original.
const SIDE: u32 = 64;

fn heart_only() -> MockModelProvider {
    MockModelProvider::new().with_mask(HEART, block_mask(8..16, 10..20, 0.9))
}

// =============================================================================
// Segmentation
// =============================================================================

#[tokio::test]
async fn test_only_heart_segmented() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, SIDE, SIDE);

    let orch = orchestrator(heart_only());
    let id = orch.register_image(&path).await.id;

    let result = orch.segment(&id, None, None).await.unwrap();

    assert_eq!(result.envelope.status, AnalysisStatus::Completed);
    assert_eq!(result.organs_segmented, vec![HEART.to_string()]);
    assert_eq!(result.organ_metrics.len(), 1);
    assert!(result.cardiothoracic_ratio.is_none());

    let png = STANDARD
        .decode(result.visualization.as_deref().unwrap())
        .unwrap();
    let overlay = image::load_from_memory(&png).unwrap();
    assert_eq!((overlay.width(), overlay.height()), (SIDE, SIDE));
}

#[tokio::test]
async fn test_heart_metrics_in_original_coordinates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, SIDE, SIDE);

    let orch = orchestrator(heart_only());
    let id = orch.register_image(&path).await.id;

    let result = orch.segment(&id, None, None).await.unwrap();
    let heart = &result.organ_metrics[HEART];

    assert_eq!(heart.bbox, [16, 20, 32, 40]);
    assert_eq!(heart.area_pixels, 16 * 20);
    assert_eq!((heart.width, heart.height), (20, 16));
    assert!((heart.confidence_score - 0.9).abs() < 1e-6);
    assert!((heart.centroid[0] - 23.5).abs() < 1e-9);
    assert!((heart.centroid[1] - 29.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_organ_filter_and_validation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, SIDE, SIDE);

    let provider = heart_only();
    let counters = provider.counters();
    let orch = orchestrator(provider);
    let id = orch.register_image(&path).await.id;

    let organs = vec!["Left Lung".to_string(), HEART.to_string()];
    let result = orch.segment(&id, Some(&organs), None).await.unwrap();
    assert_eq!(result.organs_segmented, vec![HEART.to_string()]);

    let bad = vec!["Appendix".to_string()];
    let err = orch.segment(&id, Some(&bad), None).await.unwrap_err();
    assert_eq!(err.details()["field"], "organs");
    assert_eq!(counters.segment_calls(), 1);
}

#[tokio::test]
async fn test_spacing_precedence_and_area_scaling() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, SIDE, SIDE);

    let orch = orchestrator(heart_only());
    let id = orch.register_image(&path).await.id;

    let fallback = orch.segment(&id, None, None).await.unwrap();
    assert!(!fallback.spacing_calibrated);
    assert_eq!(fallback.pixel_spacing_mm, Some(PixelSpacing::isotropic(0.2)));

    let doubled = orch
        .segment(&id, None, Some(PixelSpacing::isotropic(0.4)))
        .await
        .unwrap();
    assert!(doubled.spacing_calibrated);

    let ratio =
        doubled.organ_metrics[HEART].area_cm2 / fallback.organ_metrics[HEART].area_cm2;
    assert!((ratio - 4.0).abs() < 1e-9);

    let err = orch
        .segment(&id, None, Some(PixelSpacing::new(0.0, 0.2)))
        .await
        .unwrap_err();
    assert_eq!(err.details()["field"], "pixel_spacing_mm");
}

#[tokio::test]
async fn test_segmentation_model_failure_folds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    write_radiograph(&path, SIDE, SIDE);

    let orch = orchestrator(
        MockModelProvider::new().with_call_error(BackendError::Connection("reset".into())),
    );
    let id = orch.register_image(&path).await.id;

    let result = orch.segment(&id, None, None).await.unwrap();
    assert_eq!(result.envelope.status, AnalysisStatus::Failed);
    assert!(result
        .envelope
        .error
        .as_deref()
        .unwrap()
        .starts_with("Model 'mock-pspnet' error:"));
    assert!(result.organs_segmented.is_empty());
    assert!(result.visualization.is_none());
}

#[tokio::test]
async fn test_undecodable_image_folds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cxr.png");
    std::fs::write(&path, b"not a png").unwrap();

    let orch = orchestrator(heart_only());
    let id = orch.register_image(&path).await.id;

    let result = orch.segment(&id, None, None).await.unwrap();
    assert_eq!(result.envelope.status, AnalysisStatus::Failed);
}

// =============================================================================
// DICOM
// =============================================================================

#[tokio::test]
async fn test_dicom_render_registers_calibrated_image() {
    let dir = TempDir::new().unwrap();
    let dicom = dir.path().join("study.dcm");
    std::fs::write(&dicom, b"mock").unwrap();

    let spacing = PixelSpacing::new(0.14, 0.14);
    let orch = orchestrator(heart_only().with_dicom(dir.path(), Some(spacing)));

    let rendered = orch
        .process_dicom(dicom.to_str().unwrap(), None, None)
        .await
        .unwrap();

    assert_eq!(rendered.envelope.status, AnalysisStatus::Completed);
    assert_eq!(rendered.original_path, dicom.to_str().unwrap());
    assert!(!rendered.image_base64.as_deref().unwrap().is_empty());
    assert_eq!(rendered.metadata.as_ref().unwrap().modality.as_deref(), Some("DX"));

    let id = rendered.image_id.unwrap();
    let entity = orch.get_image(&id).await.unwrap();
    assert_eq!(entity.pixel_spacing, Some(spacing));

    let segmented = orch.segment(&id, None, None).await.unwrap();
    assert!(segmented.spacing_calibrated);
    assert_eq!(segmented.pixel_spacing_mm, Some(spacing));
}

#[tokio::test]
async fn test_dicom_request_errors() {
    let dir = TempDir::new().unwrap();
    let not_dicom = dir.path().join("photo.png");
    std::fs::write(&not_dicom, b"png").unwrap();

    let orch = orchestrator(MockModelProvider::new().with_dicom(dir.path(), None));

    let err = orch
        .process_dicom("/nonexistent/study.dcm", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "image_not_found");

    let err = orch
        .process_dicom(not_dicom.to_str().unwrap(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unsupported_format");
    assert_eq!(err.details()["supported_formats"][0], "DICOM");

    let err = orch
        .dicom_metadata(not_dicom.to_str().unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unsupported_format");

    let err = orch
        .process_dicom(not_dicom.to_str().unwrap(), Some(40.0), Some(0.0))
        .await
        .unwrap_err();
    assert_eq!(err.details()["field"], "window_width");
}

#[tokio::test]
async fn test_dicom_processing_failure_folds() {
    let dir = TempDir::new().unwrap();
    let dicom = dir.path().join("study.dcm");
    std::fs::write(&dicom, b"mock").unwrap();

    let orch = orchestrator(
        MockModelProvider::new()
            .with_dicom(dir.path(), None)
            .with_call_error(BackendError::Io("disk full".into())),
    );

    let result = orch
        .process_dicom(dicom.to_str().unwrap(), None, None)
        .await
        .unwrap();
    assert_eq!(result.envelope.status, AnalysisStatus::Failed);
    assert!(result.image_id.is_none());
    assert_eq!(
        result.envelope.error.as_deref(),
        Some("Model 'dicom' error: I/O error: disk full")
    );
}
