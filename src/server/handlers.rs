//! HTTP request handlers for the analysis API.
//!
//! Each handler is a thin adapter: decode the JSON body, call the
//! orchestrator, serialize the result. Request-level failures surface as
//! [`AnalysisError`] and are rendered by its [`IntoResponse`] impl.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness plus loaded services
//! - `POST /images`, `GET /images`, `GET|DELETE /images/{image_id}` - Registry
//! - `POST /classify`, `POST /ask`, `POST /segment` - Analysis
//! - `POST /dicom/process`, `POST /dicom/metadata` - DICOM
//! - `GET /pathologies`, `GET /organs` - Supported labels

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::analysis::{
    ClassificationResult, DicomMetadata, DicomResult, PixelSpacing, SegmentationResult, VqaResult,
};
use crate::error::AnalysisError;
use crate::models::ModelProvider;
use crate::registry::{ImageEntity, ImageFormat};
use crate::service::{AnalysisOrchestrator, ServiceDomain, DEFAULT_MAX_TOKENS};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the orchestrator.
pub struct AppState<P: ModelProvider> {
    pub orchestrator: Arc<AnalysisOrchestrator<P>>,
}

impl<P: ModelProvider> AppState<P> {
    pub fn new(orchestrator: AnalysisOrchestrator<P>) -> Self {
        Self::from_shared(Arc::new(orchestrator))
    }

    /// Share an orchestrator that is also used outside the router.
    pub fn from_shared(orchestrator: Arc<AnalysisOrchestrator<P>>) -> Self {
        Self { orchestrator }
    }
}

impl<P: ModelProvider> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

// =============================================================================
// Request Bodies
// =============================================================================

/// Default decision threshold for positive findings.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Deserialize)]
pub struct RegisterImageRequest {
    pub image_path: String,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub image_id: String,

    /// Restrict the reported pathologies (empty or absent = all)
    #[serde(default)]
    pub pathologies: Option<Vec<String>>,

    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub image_ids: Vec<String>,
    pub question: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize)]
pub struct SegmentRequest {
    pub image_id: String,

    /// Restrict and order the reported organs (empty or absent = all)
    #[serde(default)]
    pub organs: Option<Vec<String>>,

    /// `[row, col]` in millimeters, overriding any registered calibration
    #[serde(default)]
    pub pixel_spacing_mm: Option<PixelSpacing>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessDicomRequest {
    pub dicom_path: String,

    #[serde(default)]
    pub window_center: Option<f64>,

    #[serde(default)]
    pub window_width: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct DicomMetadataRequest {
    pub dicom_path: String,
}

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,

    /// Whether each analysis service has been constructed
    pub services: BTreeMap<&'static str, bool>,
}

#[derive(Debug, Serialize)]
pub struct RegisterImageResponse {
    pub image_id: String,
    pub format: ImageFormat,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub image_ids: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteImageResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct PathologiesResponse {
    pub pathologies: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct OrgansResponse {
    pub organs: Vec<String>,
    pub count: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// HTTP status for each error kind.
pub fn status_for(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::ImageNotFound { .. } => StatusCode::NOT_FOUND,
        AnalysisError::Validation { .. } => StatusCode::BAD_REQUEST,
        AnalysisError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        AnalysisError::Model { .. } => StatusCode::BAD_GATEWAY,
        AnalysisError::ResourceExhausted { .. } | AnalysisError::ServiceUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Render an [`AnalysisError`] as `{error, kind, details}`.
///
/// 5xx errors are logged at ERROR, 404s at DEBUG and other client errors
/// at WARN.
impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let kind = self.kind();

        if status.is_server_error() {
            error!(kind = kind, status = status.as_u16(), "Server error: {}", self);
        } else if status == StatusCode::NOT_FOUND {
            debug!(kind = kind, status = status.as_u16(), "Resource not found: {}", self);
        } else {
            warn!(kind = kind, status = status.as_u16(), "Client error: {}", self);
        }

        (status, Json(self.to_body())).into_response()
    }
}

/// Unwrap a JSON body, turning a malformed one into a validation error.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AnalysisError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AnalysisError::validation("body", rejection.body_text(), None))
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /health`
pub async fn health_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
) -> Json<HealthResponse> {
    let services = ServiceDomain::ALL
        .iter()
        .map(|domain| (domain.as_str(), state.orchestrator.is_loaded(*domain)))
        .collect();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}

/// `POST /images`
///
/// Registration does not touch the file; existence is checked when the
/// image is analysed.
pub async fn register_image_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
    payload: Result<Json<RegisterImageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterImageResponse>), AnalysisError> {
    let request = body(payload)?;
    if request.image_path.trim().is_empty() {
        return Err(AnalysisError::validation(
            "image_path",
            "Image path cannot be empty",
            None,
        ));
    }

    let entity = state.orchestrator.register_image(&request.image_path).await;
    info!(image_id = %entity.id, format = %entity.format, "Image registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterImageResponse {
            image_id: entity.id,
            format: entity.format,
            message: "Image registered successfully".to_string(),
        }),
    ))
}

/// `GET /images`
pub async fn list_images_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
) -> Json<ImagesResponse> {
    let image_ids = state.orchestrator.list_images().await;
    Json(ImagesResponse {
        count: image_ids.len(),
        image_ids,
    })
}

/// `GET /images/{image_id}`
pub async fn get_image_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
    Path(image_id): Path<String>,
) -> Result<Json<ImageEntity>, AnalysisError> {
    state.orchestrator.get_image(&image_id).await.map(Json)
}

/// `DELETE /images/{image_id}`
///
/// Removes the registration only; the file on disk is left alone.
pub async fn delete_image_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
    Path(image_id): Path<String>,
) -> Result<Json<DeleteImageResponse>, AnalysisError> {
    if state.orchestrator.delete_image(&image_id).await {
        info!(image_id = %image_id, "Image deleted");
        Ok(Json(DeleteImageResponse { deleted: true }))
    } else {
        Err(AnalysisError::unknown_image(image_id))
    }
}

/// `POST /classify`
pub async fn classify_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
    payload: Result<Json<ClassifyRequest>, JsonRejection>,
) -> Result<Json<ClassificationResult>, AnalysisError> {
    let request = body(payload)?;
    state
        .orchestrator
        .classify(
            &request.image_id,
            request.pathologies.as_deref(),
            request.threshold,
        )
        .await
        .map(Json)
}

/// `POST /ask`
pub async fn ask_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<VqaResult>, AnalysisError> {
    let request = body(payload)?;
    state
        .orchestrator
        .ask(&request.image_ids, &request.question, request.max_tokens)
        .await
        .map(Json)
}

/// `POST /segment`
pub async fn segment_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
    payload: Result<Json<SegmentRequest>, JsonRejection>,
) -> Result<Json<SegmentationResult>, AnalysisError> {
    let request = body(payload)?;
    state
        .orchestrator
        .segment(
            &request.image_id,
            request.organs.as_deref(),
            request.pixel_spacing_mm,
        )
        .await
        .map(Json)
}

/// `POST /dicom/process`
pub async fn process_dicom_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
    payload: Result<Json<ProcessDicomRequest>, JsonRejection>,
) -> Result<Json<DicomResult>, AnalysisError> {
    let request = body(payload)?;
    state
        .orchestrator
        .process_dicom(
            &request.dicom_path,
            request.window_center,
            request.window_width,
        )
        .await
        .map(Json)
}

/// `POST /dicom/metadata`
pub async fn dicom_metadata_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
    payload: Result<Json<DicomMetadataRequest>, JsonRejection>,
) -> Result<Json<DicomMetadata>, AnalysisError> {
    let request = body(payload)?;
    state
        .orchestrator
        .dicom_metadata(&request.dicom_path)
        .await
        .map(Json)
}

/// `GET /pathologies`
pub async fn pathologies_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
) -> Json<PathologiesResponse> {
    let pathologies = state.orchestrator.supported_pathologies();
    Json(PathologiesResponse {
        count: pathologies.len(),
        pathologies,
    })
}

/// `GET /organs`
pub async fn organs_handler<P: ModelProvider>(
    State(state): State<AppState<P>>,
) -> Json<OrgansResponse> {
    let organs = state.orchestrator.supported_organs();
    Json(OrgansResponse {
        count: organs.len(),
        organs,
    })
}

// =============================================================================
// Tests
// =============================================================================
