//! Clients for a remote inference server.
//!
//! Network weights live in a separate process (typically on a GPU host).
//! Each model is loaded once through `POST /v1/models/{model}/load` and then
//! called with base64-encoded images:
//!
//! ```text
//!   GET  /health
//!   POST /v1/models/{model}/load      {device}               → {labels, resolution?}
//!   POST /v1/models/{model}/classify  {image}                → {scores}
//!   POST /v1/models/{model}/answer    {images, question, max_tokens} → {answer}
//!   POST /v1/models/{model}/segment   {image}                → {resolution, masks}
//! ```
//!
//! Segmentation masks travel as base64 little-endian `f32` rasters, one per
//! label, each `resolution x resolution`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::BackendError;
use crate::geometry::Mask;

use super::{
    labels, Classifier, DicomFileProcessor, DicomProcessor, ModelProvider, SegmentationModel,
    VisualQa, DEFAULT_ORGANS, DEFAULT_PATHOLOGIES,
};

/// Error code the inference server uses for accelerator memory exhaustion.
const RESOURCE_EXHAUSTED_CODE: &str = "resource_exhausted";

// =============================================================================
// Settings
// =============================================================================

/// Connection and model selection for [`RemoteModelProvider`].
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Base URL of the inference server
    pub base_url: String,

    /// Device hint forwarded on load (cuda, cpu, mps)
    pub device: Option<String>,

    pub classifier_model: String,

    pub vqa_model: String,

    pub segmentation_model: String,

    /// Per-request timeout for model calls
    pub timeout: Duration,

    /// Where rendered DICOM images are written
    pub temp_dir: PathBuf,
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LoadResponse {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    resolution: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    scores: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    images: Vec<String>,
    question: &'a str,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    resolution: u32,
    masks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

// =============================================================================
// InferenceClient
// =============================================================================

/// Thin JSON client shared by every remote model.
#[derive(Clone)]
struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl InferenceClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn model_url(&self, model: &str, action: &str) -> String {
        format!(
            "{}/v1/models/{}/{}",
            self.base_url,
            urlencoding::encode(model),
            action
        )
    }

    async fn health(&self) -> Result<(), BackendError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn post<Req, Resp>(&self, url: String, body: &Req) -> Result<Resp, BackendError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self.http.post(&url).json(body).send().await?;
        let response = check_status(response).await?;
        response
            .json::<Resp>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

/// Turn non-success responses into typed errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    let code = body.as_ref().and_then(|b| b.code.as_deref());
    let message = body
        .as_ref()
        .and_then(|b| b.error.clone())
        .unwrap_or(text);

    if status == StatusCode::INSUFFICIENT_STORAGE || code == Some(RESOURCE_EXHAUSTED_CODE) {
        return Err(BackendError::ResourceExhausted {
            resource: if message.is_empty() {
                "accelerator memory".to_string()
            } else {
                message
            },
        });
    }

    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn encode_image(path: &Path) -> Result<String, BackendError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(STANDARD.encode(bytes))
}

/// Decode one base64 little-endian `f32` raster.
fn decode_mask(encoded: &str, resolution: u32) -> Result<Mask, BackendError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| BackendError::InvalidResponse(format!("mask is not base64: {}", e)))?;

    let side = resolution as usize;
    let expected = side
        .checked_mul(side)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| {
            BackendError::InvalidResponse(format!("mask resolution {} is too large", resolution))
        })?;
    if bytes.len() != expected {
        return Err(BackendError::InvalidResponse(format!(
            "mask has {} bytes, expected {} for {}x{}",
            bytes.len(),
            expected,
            resolution,
            resolution
        )));
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Mask::from_raw(resolution, resolution, values)
        .ok_or_else(|| BackendError::InvalidResponse("mask buffer too small".to_string()))
}

// =============================================================================
// RemoteModelProvider
// =============================================================================

/// Builds remote classifier, VQA and segmentation clients, plus the local
/// DICOM processor.
pub struct RemoteModelProvider {
    client: InferenceClient,
    settings: RemoteSettings,
}

impl RemoteModelProvider {
    pub fn new(settings: RemoteSettings) -> Result<Self, BackendError> {
        let client = InferenceClient::new(&settings.base_url, settings.timeout)?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    /// Check that the inference server answers.
    pub async fn health(&self) -> Result<(), BackendError> {
        self.client.health().await
    }

    async fn load(&self, model: &str) -> Result<LoadResponse, BackendError> {
        info!(model = %model, device = ?self.settings.device, "Loading model");
        let request = LoadRequest {
            device: self.settings.device.as_deref(),
        };
        let response: LoadResponse = self
            .client
            .post(self.client.model_url(model, "load"), &request)
            .await?;
        debug!(
            model = %model,
            labels = response.labels.len(),
            resolution = ?response.resolution,
            "Model loaded"
        );
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for RemoteModelProvider {
    async fn load_classifier(&self) -> Result<Arc<dyn Classifier>, BackendError> {
        let model = self.settings.classifier_model.clone();
        let loaded = self.load(&model).await?;
        let pathologies = if loaded.labels.is_empty() {
            labels(&DEFAULT_PATHOLOGIES)
        } else {
            loaded.labels
        };

        Ok(Arc::new(RemoteClassifier {
            client: self.client.clone(),
            model,
            pathologies,
        }))
    }

    async fn load_visual_qa(&self) -> Result<Arc<dyn VisualQa>, BackendError> {
        let model = self.settings.vqa_model.clone();
        self.load(&model).await?;

        Ok(Arc::new(RemoteVisualQa {
            client: self.client.clone(),
            model,
        }))
    }

    async fn load_segmentation(&self) -> Result<Arc<dyn SegmentationModel>, BackendError> {
        let model = self.settings.segmentation_model.clone();
        let loaded = self.load(&model).await?;
        let organs = if loaded.labels.is_empty() {
            labels(&DEFAULT_ORGANS)
        } else {
            loaded.labels
        };

        Ok(Arc::new(RemoteSegmenter {
            client: self.client.clone(),
            model,
            organs,
        }))
    }

    async fn load_dicom(&self) -> Result<Arc<dyn DicomProcessor>, BackendError> {
        let processor = DicomFileProcessor::create(&self.settings.temp_dir).await?;
        Ok(Arc::new(processor))
    }
}

// =============================================================================
// Remote models
// =============================================================================

struct RemoteClassifier {
    client: InferenceClient,
    model: String,
    pathologies: Vec<String>,
}

#[async_trait]
impl Classifier for RemoteClassifier {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn supported_pathologies(&self) -> &[String] {
        &self.pathologies
    }

    async fn classify(&self, image_path: &Path) -> Result<BTreeMap<String, f64>, BackendError> {
        let request = ImageRequest {
            image: encode_image(image_path).await?,
        };
        let response: ClassifyResponse = self
            .client
            .post(self.client.model_url(&self.model, "classify"), &request)
            .await?;

        if let Some((name, p)) = response
            .scores
            .iter()
            .find(|(_, p)| !(0.0..=1.0).contains(*p))
        {
            return Err(BackendError::InvalidResponse(format!(
                "probability for '{}' out of range: {}",
                name, p
            )));
        }
        Ok(response.scores)
    }
}

struct RemoteVisualQa {
    client: InferenceClient,
    model: String,
}

#[async_trait]
impl VisualQa for RemoteVisualQa {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(
        &self,
        image_paths: &[PathBuf],
        question: &str,
        max_tokens: usize,
    ) -> Result<String, BackendError> {
        let mut images = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            images.push(encode_image(path).await?);
        }

        let request = AnswerRequest {
            images,
            question,
            max_tokens,
        };
        let response: AnswerResponse = self
            .client
            .post(self.client.model_url(&self.model, "answer"), &request)
            .await?;
        Ok(response.answer)
    }
}

struct RemoteSegmenter {
    client: InferenceClient,
    model: String,
    organs: Vec<String>,
}

#[async_trait]
impl SegmentationModel for RemoteSegmenter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn supported_organs(&self) -> &[String] {
        &self.organs
    }

    async fn segment(&self, image_path: &Path) -> Result<Vec<Mask>, BackendError> {
        let request = ImageRequest {
            image: encode_image(image_path).await?,
        };
        let response: SegmentResponse = self
            .client
            .post(self.client.model_url(&self.model, "segment"), &request)
            .await?;

        if response.masks.len() != self.organs.len() {
            return Err(BackendError::InvalidResponse(format!(
                "expected {} masks, got {}",
                self.organs.len(),
                response.masks.len()
            )));
        }

        response
            .masks
            .iter()
            .map(|m| decode_mask(m, response.resolution))
            .collect()
    }
}

impl std::fmt::Debug for RemoteModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteModelProvider")
            .field("base_url", &self.client.base_url)
            .finish()
    }
}
