//! Model collaborators.
//!
//! The orchestrator never talks to a concrete model. It depends on four
//! narrow traits and a [`ModelProvider`] that constructs them:
//!
//! ```text
//!   AnalysisOrchestrator ──▶ ModelProvider
//!                                 │
//!        ┌──────────────┬─────────┴───────┬──────────────────┐
//!        ▼              ▼                 ▼                  ▼
//!   Classifier      VisualQa      SegmentationModel    DicomProcessor
//!    (remote)       (remote)          (remote)             (local)
//! ```
//!
//! - [`remote`] - JSON-over-HTTP clients for an inference server
//! - [`dicom`] - Local DICOM decoding and rendering

pub mod dicom;
pub mod remote;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::analysis::DicomMetadata;
use crate::error::BackendError;
use crate::geometry::Mask;

pub use dicom::DicomFileProcessor;
pub use remote::{RemoteModelProvider, RemoteSettings};

// =============================================================================
// Label sets
// =============================================================================

/// Pathologies scored by the default chest X-ray classifier.
pub const DEFAULT_PATHOLOGIES: [&str; 18] = [
    "Atelectasis",
    "Cardiomegaly",
    "Consolidation",
    "Edema",
    "Effusion",
    "Emphysema",
    "Enlarged Cardiomediastinum",
    "Fibrosis",
    "Fracture",
    "Hernia",
    "Infiltration",
    "Lung Lesion",
    "Lung Opacity",
    "Mass",
    "Nodule",
    "Pleural Thickening",
    "Pneumonia",
    "Pneumothorax",
];

/// Structures produced by the default segmentation model. The position of
/// a name is its mask index.
pub const DEFAULT_ORGANS: [&str; 14] = [
    "Left Clavicle",
    "Right Clavicle",
    "Left Scapula",
    "Right Scapula",
    "Left Lung",
    "Right Lung",
    "Left Hilus Pulmonis",
    "Right Hilus Pulmonis",
    "Heart",
    "Aorta",
    "Facies Diaphragmatica",
    "Mediastinum",
    "Weasand",
    "Spine",
];

/// Owned copy of a label constant.
pub fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Multi-label pathology classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn model_name(&self) -> &str;

    /// Pathologies this classifier scores.
    fn supported_pathologies(&self) -> &[String];

    /// Score every supported pathology for one image, each in [0, 1].
    async fn classify(&self, image_path: &Path) -> Result<BTreeMap<String, f64>, BackendError>;
}

/// Visual question answering over one or more images.
#[async_trait]
pub trait VisualQa: Send + Sync {
    fn model_name(&self) -> &str;

    async fn answer(
        &self,
        image_paths: &[PathBuf],
        question: &str,
        max_tokens: usize,
    ) -> Result<String, BackendError>;
}

/// Anatomical segmentation producing one mask per supported organ.
#[async_trait]
pub trait SegmentationModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Organs in mask-index order.
    fn supported_organs(&self) -> &[String];

    /// Mask index of an organ.
    fn organ_index(&self, organ: &str) -> Option<usize> {
        self.supported_organs().iter().position(|o| o == organ)
    }

    /// Segment one image. Masks are square, in the model's native
    /// resolution, indexed like [`supported_organs`](Self::supported_organs).
    async fn segment(&self, image_path: &Path) -> Result<Vec<Mask>, BackendError>;
}

/// DICOM decoding and rendering.
#[async_trait]
pub trait DicomProcessor: Send + Sync {
    /// Render a DICOM file to PNG. Caller window values override the
    /// file's own.
    async fn process(
        &self,
        dicom_path: &Path,
        window_center: Option<f64>,
        window_width: Option<f64>,
    ) -> Result<(PathBuf, DicomMetadata), BackendError>;

    async fn extract_metadata(&self, dicom_path: &Path) -> Result<DicomMetadata, BackendError>;
}

// =============================================================================
// ModelProvider
// =============================================================================

/// Constructs collaborators on demand.
///
/// Construction may be expensive (weights loaded onto an accelerator), so
/// callers are expected to construct each collaborator once and share it.
/// A [`BackendError::ResourceExhausted`] signals that the accelerator ran
/// out of memory.
#[async_trait]
pub trait ModelProvider: Send + Sync + 'static {
    async fn load_classifier(&self) -> Result<Arc<dyn Classifier>, BackendError>;

    async fn load_visual_qa(&self) -> Result<Arc<dyn VisualQa>, BackendError>;

    async fn load_segmentation(&self) -> Result<Arc<dyn SegmentationModel>, BackendError>;

    async fn load_dicom(&self) -> Result<Arc<dyn DicomProcessor>, BackendError>;
}
