//! Analysis services and the orchestrator that owns them.
//!
//! Each service wraps one model collaborator. The orchestrator resolves
//! ids, checks files and runs the label-free input checks before a
//! service is even constructed; services check what needs their label set.
//! The contract is the same everywhere:
//!
//! - Request problems (unknown id, missing file, bad input, unsupported
//!   format) return `Err(AnalysisError)` before any model runs.
//! - Failures inside the model or post-processing return `Ok` with a
//!   `Failed` envelope and `error` set.

mod classification;
mod dicom;
mod orchestrator;
mod segmentation;
mod vqa;

pub use classification::ClassificationService;
pub use dicom::DicomService;
pub use orchestrator::{AnalysisOrchestrator, ServiceDomain};
pub use segmentation::{SegmentationService, SegmentationSettings};
pub use vqa::{VqaService, DEFAULT_MAX_TOKENS};

use std::path::Path;

use crate::error::AnalysisError;
use crate::registry::{is_valid_id, ImageEntity, ImageRegistry};

/// Resolve an id to its entity. Unknown or malformed ids fail with
/// `ImageNotFound`; malformed ones without touching the registry lock.
pub(crate) async fn resolve_image(
    registry: &ImageRegistry,
    image_id: &str,
) -> Result<ImageEntity, AnalysisError> {
    if !is_valid_id(image_id) {
        return Err(AnalysisError::unknown_image(image_id));
    }
    registry
        .get(image_id)
        .await
        .ok_or_else(|| AnalysisError::unknown_image(image_id))
}

/// Fail with `ImageNotFound { image_path }` unless the file exists.
pub(crate) async fn ensure_exists(path: &Path) -> Result<(), AnalysisError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        _ => Err(AnalysisError::missing_file(path.display().to_string())),
    }
}
