//! Test utilities for integration tests.
//!
//! Mock model collaborators with call counters and scripted failures, plus
//! helpers for writing synthetic radiographs and masks.

use async_trait::async_trait;
use image::{GrayImage, Luma};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cxr_analysis::analysis::{DicomMetadata, PixelSpacing};
use cxr_analysis::error::BackendError;
use cxr_analysis::geometry::Mask;
use cxr_analysis::models::{
    labels, Classifier, DicomProcessor, ModelProvider, SegmentationModel, VisualQa,
    DEFAULT_ORGANS, DEFAULT_PATHOLOGIES,
};
use cxr_analysis::service::{AnalysisOrchestrator, SegmentationSettings};

/// Mask resolution used by the mock segmenter.
pub const MOCK_RESOLUTION: u32 = 32;

// =============================================================================
// Mock Collaborators
// =============================================================================

/// Shared call and construction counters.
#[derive(Debug, Default)]
pub struct Counters {
    pub loads: AtomicUsize,
    pub classify_calls: AtomicUsize,
    pub answer_calls: AtomicUsize,
    pub segment_calls: AtomicUsize,
}

impl Counters {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn answer_calls(&self) -> usize {
        self.answer_calls.load(Ordering::SeqCst)
    }

    pub fn segment_calls(&self) -> usize {
        self.segment_calls.load(Ordering::SeqCst)
    }
}

/// A provider whose collaborators return canned outputs.
///
/// Construction can be made slow (to exercise concurrent first use) or made
/// to fail a fixed number of times.
pub struct MockModelProvider {
    scores: BTreeMap<String, f64>,
    masks: Vec<Mask>,
    answer: String,
    call_error: Option<BackendError>,
    load_error: Option<BackendError>,
    load_failures: AtomicUsize,
    load_delay: Duration,
    dicom_dir: PathBuf,
    dicom_spacing: Option<PixelSpacing>,
    counters: Arc<Counters>,
}

impl MockModelProvider {
    pub fn new() -> Self {
        Self {
            scores: BTreeMap::new(),
            masks: vec![empty_mask(); DEFAULT_ORGANS.len()],
            answer: "No acute cardiopulmonary process.".to_string(),
            call_error: None,
            load_error: None,
            load_failures: AtomicUsize::new(0),
            load_delay: Duration::ZERO,
            dicom_dir: std::env::temp_dir(),
            dicom_spacing: None,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_scores(mut self, scores: &[(&str, f64)]) -> Self {
        self.scores = scores
            .iter()
            .map(|(name, p)| (name.to_string(), *p))
            .collect();
        self
    }

    /// Set the mask returned for one organ.
    pub fn with_mask(mut self, organ: &str, mask: Mask) -> Self {
        let index = DEFAULT_ORGANS
            .iter()
            .position(|o| *o == organ)
            .expect("unknown organ");
        self.masks[index] = mask;
        self
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = answer.into();
        self
    }

    /// Every model call fails with `err`.
    pub fn with_call_error(mut self, err: BackendError) -> Self {
        self.call_error = Some(err);
        self
    }

    /// The first `times` constructions fail with `err`.
    pub fn failing_loads(mut self, times: usize, err: BackendError) -> Self {
        self.load_failures = AtomicUsize::new(times);
        self.load_error = Some(err);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Where the mock DICOM processor writes, and the spacing it reports.
    pub fn with_dicom(mut self, dir: &Path, spacing: Option<PixelSpacing>) -> Self {
        self.dicom_dir = dir.to_path_buf();
        self.dicom_spacing = spacing;
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    async fn construct(&self) -> Result<(), BackendError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        let remaining = self.load_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.load_failures.store(remaining - 1, Ordering::SeqCst);
            if let Some(ref err) = self.load_error {
                return Err(err.clone());
            }
        }
        Ok(())
    }
}

impl Default for MockModelProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for MockModelProvider {
    async fn load_classifier(&self) -> Result<Arc<dyn Classifier>, BackendError> {
        self.construct().await?;
        Ok(Arc::new(MockClassifier {
            pathologies: labels(&DEFAULT_PATHOLOGIES),
            scores: self.scores.clone(),
            error: self.call_error.clone(),
            counters: self.counters(),
        }))
    }

    async fn load_visual_qa(&self) -> Result<Arc<dyn VisualQa>, BackendError> {
        self.construct().await?;
        Ok(Arc::new(MockVisualQa {
            answer: self.answer.clone(),
            error: self.call_error.clone(),
            counters: self.counters(),
        }))
    }

    async fn load_segmentation(&self) -> Result<Arc<dyn SegmentationModel>, BackendError> {
        self.construct().await?;
        Ok(Arc::new(MockSegmenter {
            organs: labels(&DEFAULT_ORGANS),
            masks: self.masks.clone(),
            error: self.call_error.clone(),
            counters: self.counters(),
        }))
    }

    async fn load_dicom(&self) -> Result<Arc<dyn DicomProcessor>, BackendError> {
        self.construct().await?;
        Ok(Arc::new(MockDicomProcessor {
            output_dir: self.dicom_dir.clone(),
            spacing: self.dicom_spacing,
            error: self.call_error.clone(),
        }))
    }
}

pub struct MockClassifier {
    pathologies: Vec<String>,
    scores: BTreeMap<String, f64>,
    error: Option<BackendError>,
    counters: Arc<Counters>,
}

#[async_trait]
impl Classifier for MockClassifier {
    fn model_name(&self) -> &str {
        "mock-densenet"
    }

    fn supported_pathologies(&self) -> &[String] {
        &self.pathologies
    }

    async fn classify(&self, _image_path: &Path) -> Result<BTreeMap<String, f64>, BackendError> {
        self.counters.classify_calls.fetch_add(1, Ordering::SeqCst);
        match self.error {
            Some(ref err) => Err(err.clone()),
            None => Ok(self.scores.clone()),
        }
    }
}

pub struct MockVisualQa {
    answer: String,
    error: Option<BackendError>,
    counters: Arc<Counters>,
}

#[async_trait]
impl VisualQa for MockVisualQa {
    fn model_name(&self) -> &str {
        "mock-chexagent"
    }

    async fn answer(
        &self,
        _image_paths: &[PathBuf],
        _question: &str,
        _max_tokens: usize,
    ) -> Result<String, BackendError> {
        self.counters.answer_calls.fetch_add(1, Ordering::SeqCst);
        match self.error {
            Some(ref err) => Err(err.clone()),
            None => Ok(format!("  {}\n", self.answer)),
        }
    }
}

pub struct MockSegmenter {
    organs: Vec<String>,
    masks: Vec<Mask>,
    error: Option<BackendError>,
    counters: Arc<Counters>,
}

#[async_trait]
impl SegmentationModel for MockSegmenter {
    fn model_name(&self) -> &str {
        "mock-pspnet"
    }

    fn supported_organs(&self) -> &[String] {
        &self.organs
    }

    async fn segment(&self, _image_path: &Path) -> Result<Vec<Mask>, BackendError> {
        self.counters.segment_calls.fetch_add(1, Ordering::SeqCst);
        match self.error {
            Some(ref err) => Err(err.clone()),
            None => Ok(self.masks.clone()),
        }
    }
}

/// Writes a flat gray PNG for anything ending in `.dcm` and rejects the
/// rest as non-DICOM.
pub struct MockDicomProcessor {
    output_dir: PathBuf,
    spacing: Option<PixelSpacing>,
    error: Option<BackendError>,
}

impl MockDicomProcessor {
    fn metadata(&self) -> DicomMetadata {
        DicomMetadata {
            patient_id: Some("ANON-001".to_string()),
            modality: Some("DX".to_string()),
            pixel_spacing: self.spacing,
            ..Default::default()
        }
    }

    fn check(&self, path: &Path) -> Result<(), BackendError> {
        if path.extension().and_then(|e| e.to_str()) != Some("dcm") {
            return Err(BackendError::UnsupportedFormat {
                format: "unknown".to_string(),
            });
        }
        match self.error {
            Some(ref err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DicomProcessor for MockDicomProcessor {
    async fn process(
        &self,
        dicom_path: &Path,
        _window_center: Option<f64>,
        _window_width: Option<f64>,
    ) -> Result<(PathBuf, DicomMetadata), BackendError> {
        self.check(dicom_path)?;
        let output = self.output_dir.join("dicom_mock.png");
        write_radiograph(&output, 48, 40);
        Ok((output, self.metadata()))
    }

    async fn extract_metadata(&self, dicom_path: &Path) -> Result<DicomMetadata, BackendError> {
        self.check(dicom_path)?;
        Ok(self.metadata())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Orchestrator over a mock provider with default settings.
pub fn orchestrator(provider: MockModelProvider) -> AnalysisOrchestrator<MockModelProvider> {
    AnalysisOrchestrator::new(provider, SegmentationSettings::default())
}

/// Write a grayscale PNG with a horizontal gradient.
pub fn write_radiograph(path: &Path, width: u32, height: u32) {
    let image = GrayImage::from_fn(width, height, |x, _| Luma([(x * 255 / width.max(1)) as u8]));
    image.save(path).expect("write test PNG");
}

/// A model-space mask with no activation.
pub fn empty_mask() -> Mask {
    Mask::new(MOCK_RESOLUTION, MOCK_RESOLUTION)
}

/// A model-space mask with `value` on `rows` x `cols` (half-open ranges).
pub fn block_mask(rows: std::ops::Range<u32>, cols: std::ops::Range<u32>, value: f32) -> Mask {
    Mask::from_fn(MOCK_RESOLUTION, MOCK_RESOLUTION, |x, y| {
        if rows.contains(&y) && cols.contains(&x) {
            Luma([value])
        } else {
            Luma([0.0])
        }
    })
}
