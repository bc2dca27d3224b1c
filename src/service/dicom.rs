use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use crate::analysis::{DicomMetadata, DicomResult};
use crate::error::{AnalysisError, BackendError};
use crate::models::DicomProcessor;
use crate::registry::ImageRegistry;

const MODEL_NAME: &str = "dicom";

/// DICOM rendering and metadata extraction.
///
/// Rendered images are registered so they can be analysed by id; the
/// file's pixel spacing travels with the registration.
pub struct DicomService {
    processor: Arc<dyn DicomProcessor>,
    registry: Arc<ImageRegistry>,
}

impl DicomService {
    pub fn new(processor: Arc<dyn DicomProcessor>, registry: Arc<ImageRegistry>) -> Self {
        Self {
            processor,
            registry,
        }
    }

    /// Render an existing DICOM file to PNG and register the result.
    ///
    /// A `window_width`, when given, has already been checked positive.
    pub async fn process(
        &self,
        dicom_path: &str,
        window_center: Option<f64>,
        window_width: Option<f64>,
    ) -> Result<DicomResult, AnalysisError> {
        let started = Instant::now();
        let path = Path::new(dicom_path);

        let mut result = DicomResult::new(dicom_path);

        let (output_path, metadata) = match self
            .processor
            .process(path, window_center, window_width)
            .await
        {
            Ok(rendered) => rendered,
            Err(e) => return fold_error(e, result),
        };

        let image_base64 = match tokio::fs::read(&output_path).await {
            Ok(bytes) => STANDARD.encode(bytes),
            Err(e) => return fold_error(e.into(), result),
        };

        let entity = self
            .registry
            .store_with_spacing(&output_path, metadata.pixel_spacing)
            .await;
        debug!(
            image_id = %entity.id,
            dicom_path = %dicom_path,
            processed_path = %output_path.display(),
            "DICOM rendered and registered"
        );

        result.image_id = Some(entity.id);
        result.image_base64 = Some(image_base64);
        result.metadata = Some(metadata);
        result.processed_path = Some(output_path.display().to_string());
        result.envelope.complete(started);
        Ok(result)
    }

    /// Read metadata of an existing file without rendering.
    pub async fn metadata(&self, dicom_path: &str) -> Result<DicomMetadata, AnalysisError> {
        self.processor
            .extract_metadata(Path::new(dicom_path))
            .await
            .map_err(|e| match e {
                BackendError::UnsupportedFormat { format } => unsupported(format),
                other => other.into_model_error(MODEL_NAME),
            })
    }
}

fn unsupported(format: String) -> AnalysisError {
    AnalysisError::UnsupportedFormat {
        format,
        supported: vec!["DICOM".to_string()],
    }
}

/// Unsupported input is a request error; anything else fails the result.
fn fold_error(err: BackendError, result: DicomResult) -> Result<DicomResult, AnalysisError> {
    match err {
        BackendError::UnsupportedFormat { format } => Err(unsupported(format)),
        other => {
            let err = other.into_model_error(MODEL_NAME);
            warn!(path = %result.original_path, error = %err, "DICOM processing failed");
            Ok(result.fail(err.to_string()))
        }
    }
}
