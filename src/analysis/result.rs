//! Result envelopes returned by every analysis operation.
//!
//! Each result is created fresh per call in the `Pending` state and moves
//! exactly once to `Completed` or `Failed`:
//!
//! ```text
//!              complete()
//!   Pending ───────────────▶ Completed
//!      │
//!      │       fail(msg)
//!      └───────────────────▶ Failed
//! ```
//!
//! `Processing` is part of the vocabulary but never assigned: calls are
//! synchronous from the caller's point of view, so nobody can observe an
//! in-flight result.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::geometry::OrganMetrics;

use super::dicom::{DicomMetadata, PixelSpacing};

/// Number of entries reported in `top_findings`.
pub const TOP_FINDINGS: usize = 5;

// =============================================================================
// Status and envelope
// =============================================================================

/// Lifecycle state of an analysis result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

/// Fields shared by every result variant.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub status: AnalysisStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub processing_time_ms: Option<f64>,

    pub timestamp: DateTime<Utc>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            status: AnalysisStatus::Pending,
            error: None,
            processing_time_ms: None,
            timestamp: Utc::now(),
        }
    }
}

impl Envelope {
    /// Mark the result completed, recording the elapsed time since `started`.
    pub fn complete(&mut self, started: Instant) {
        debug_assert!(!self.status.is_terminal());
        self.status = AnalysisStatus::Completed;
        self.processing_time_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Mark the result failed. Payload fields keep their defaults.
    pub fn fail(&mut self, message: impl Into<String>) {
        debug_assert!(!self.status.is_terminal());
        self.status = AnalysisStatus::Failed;
        self.error = Some(message.into());
    }
}

// =============================================================================
// Classification
// =============================================================================

/// One entry of `top_findings`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub pathology: String,
    pub probability: f64,
}

/// Pathology classification of a single radiograph.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    #[serde(flatten)]
    pub envelope: Envelope,

    /// Probability per pathology in [0, 1]
    pub classifications: BTreeMap<String, f64>,

    /// Pathologies at or above `threshold`
    pub positive_findings: BTreeMap<String, f64>,

    pub top_findings: Vec<Finding>,

    pub model: String,

    pub threshold: f64,
}

impl ClassificationResult {
    pub fn new(model: impl Into<String>, threshold: f64) -> Self {
        Self {
            envelope: Envelope::default(),
            classifications: BTreeMap::new(),
            positive_findings: BTreeMap::new(),
            top_findings: Vec::new(),
            model: model.into(),
            threshold,
        }
    }

    /// Populate the payload from raw scores and mark the result completed.
    pub fn complete(mut self, scores: BTreeMap<String, f64>, started: Instant) -> Self {
        self.positive_findings = positive_findings(&scores, self.threshold);
        self.top_findings = top_findings(&scores, TOP_FINDINGS);
        self.classifications = scores;
        self.envelope.complete(started);
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.envelope.fail(message);
        self
    }
}

/// Scores at or above the threshold (inclusive).
pub fn positive_findings(scores: &BTreeMap<String, f64>, threshold: f64) -> BTreeMap<String, f64> {
    scores
        .iter()
        .filter(|(_, &p)| p >= threshold)
        .map(|(name, &p)| (name.clone(), p))
        .collect()
}

/// The `n` highest scores, descending, probabilities rounded to 4 decimals.
pub fn top_findings(scores: &BTreeMap<String, f64>, n: usize) -> Vec<Finding> {
    let mut sorted: Vec<(&String, f64)> = scores.iter().map(|(k, &v)| (k, v)).collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
    sorted
        .into_iter()
        .take(n)
        .map(|(name, p)| Finding {
            pathology: name.clone(),
            probability: (p * 10_000.0).round() / 10_000.0,
        })
        .collect()
}

// =============================================================================
// Segmentation
// =============================================================================

/// Anatomical segmentation of a single radiograph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SegmentationResult {
    #[serde(flatten)]
    pub envelope: Envelope,

    /// Organs with a non-empty mask, in request order
    pub organs_segmented: Vec<String>,

    pub organ_metrics: BTreeMap<String, OrganMetrics>,

    /// Base64-encoded PNG overlay
    pub visualization: Option<String>,

    pub pixel_spacing_mm: Option<PixelSpacing>,

    /// False when `pixel_spacing_mm` is the configured default, in which
    /// case `area_cm2` is only a proxy
    pub spacing_calibrated: bool,

    /// Heart width over thoracic width, when heart and both lungs were found
    pub cardiothoracic_ratio: Option<f64>,
}

impl SegmentationResult {
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.envelope.fail(message);
        self
    }
}

// =============================================================================
// Visual question answering
// =============================================================================

/// Answer to a free-text question about one or more radiographs.
#[derive(Debug, Clone, Serialize)]
pub struct VqaResult {
    #[serde(flatten)]
    pub envelope: Envelope,

    pub question: String,

    pub answer: String,

    pub images_analyzed: usize,

    pub model: String,
}

impl VqaResult {
    pub fn new(question: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::default(),
            question: question.into(),
            answer: String::new(),
            images_analyzed: 0,
            model: model.into(),
        }
    }

    pub fn complete(mut self, answer: String, images_analyzed: usize, started: Instant) -> Self {
        self.answer = answer.trim().to_string();
        self.images_analyzed = images_analyzed;
        self.envelope.complete(started);
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.envelope.fail(message);
        self
    }
}

// =============================================================================
// DICOM
// =============================================================================

/// Rendered DICOM image registered for further analysis.
#[derive(Debug, Clone, Serialize)]
pub struct DicomResult {
    #[serde(flatten)]
    pub envelope: Envelope,

    /// Registry id of the rendered PNG
    pub image_id: Option<String>,

    pub image_base64: Option<String>,

    pub metadata: Option<DicomMetadata>,

    pub original_path: String,

    pub processed_path: Option<String>,
}

impl DicomResult {
    pub fn new(original_path: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::default(),
            image_id: None,
            image_base64: None,
            metadata: None,
            original_path: original_path.into(),
            processed_path: None,
        }
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.envelope.fail(message);
        self
    }
}
