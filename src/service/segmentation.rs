use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::analysis::{PixelSpacing, SegmentationResult};
use crate::error::{AnalysisError, BackendError};
use crate::geometry::{process_masks, Compositor, Mask, SegmentationGeometry};
use crate::models::SegmentationModel;
use crate::registry::ImageEntity;
use crate::validation::validate_members;

/// Post-processing parameters for segmentation.
#[derive(Clone)]
pub struct SegmentationSettings {
    /// Spacing used when neither the caller nor the registry knows one
    pub default_spacing: PixelSpacing,

    /// A mask pixel is part of an organ when its value exceeds this
    pub activation_threshold: f32,

    pub compositor: Compositor,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            default_spacing: PixelSpacing::isotropic(0.2),
            activation_threshold: 0.5,
            compositor: Compositor::new(0.3, 0.5),
        }
    }
}

/// Anatomical segmentation with geometry post-processing.
pub struct SegmentationService {
    model: Arc<dyn SegmentationModel>,
    settings: SegmentationSettings,
}

impl SegmentationService {
    pub fn new(model: Arc<dyn SegmentationModel>, settings: SegmentationSettings) -> Self {
        Self { model, settings }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn supported_organs(&self) -> &[String] {
        self.model.supported_organs()
    }

    /// Segment one registered image whose file is known to exist.
    ///
    /// `organs` restricts and orders the reported structures; `None` or an
    /// empty list means every supported organ. Spacing precedence is a
    /// valid `pixel_spacing` argument, then the registered entity, then the
    /// configured default.
    pub async fn segment(
        &self,
        entity: &ImageEntity,
        organs: Option<&[String]>,
        pixel_spacing: Option<PixelSpacing>,
    ) -> Result<SegmentationResult, AnalysisError> {
        let started = Instant::now();

        let requested: Vec<String> = match organs {
            Some(o) if !o.is_empty() => {
                validate_members("organs", o, self.supported_organs())?.to_vec()
            }
            _ => self.supported_organs().to_vec(),
        };

        let calibrated = pixel_spacing.or(entity.pixel_spacing);
        let spacing = calibrated.unwrap_or(self.settings.default_spacing);

        let mut result = SegmentationResult {
            pixel_spacing_mm: Some(spacing),
            spacing_calibrated: calibrated.is_some(),
            ..Default::default()
        };

        let model = self.model_name().to_string();
        match self.run(entity.path.clone(), &requested, spacing).await {
            Ok(geometry) => {
                debug!(
                    image_id = %entity.id,
                    requested = requested.len(),
                    segmented = geometry.organs_segmented.len(),
                    calibrated = calibrated.is_some(),
                    "Segmentation completed"
                );
                result.organs_segmented = geometry.organs_segmented;
                result.organ_metrics = geometry.organ_metrics;
                result.cardiothoracic_ratio = geometry.cardiothoracic_ratio;
                result.visualization = Some(geometry.visualization);
                result.envelope.complete(started);
                Ok(result)
            }
            Err(e) => {
                let err = e.into_model_error(&model);
                warn!(image_id = %entity.id, error = %err, "Segmentation failed");
                Ok(result.fail(err.to_string()))
            }
        }
    }

    /// Model call plus geometry on a blocking thread.
    async fn run(
        &self,
        path: PathBuf,
        requested: &[String],
        spacing: PixelSpacing,
    ) -> Result<SegmentationGeometry, BackendError> {
        let masks = self.model.segment(&path).await?;

        let mut selected: Vec<(String, Mask)> = Vec::with_capacity(requested.len());
        for organ in requested {
            let mask = self
                .model
                .organ_index(organ)
                .and_then(|i| masks.get(i))
                .ok_or_else(|| {
                    BackendError::InvalidResponse(format!("no mask returned for '{}'", organ))
                })?;
            selected.push((organ.clone(), mask.clone()));
        }

        let threshold = self.settings.activation_threshold;
        let compositor = self.settings.compositor.clone();
        tokio::task::spawn_blocking(move || {
            let original = image::open(&path)?;
            let geometry = process_masks(&original, &selected, spacing, threshold, &compositor)?;
            Ok::<_, BackendError>(geometry)
        })
        .await
        .map_err(|e| BackendError::Inference(format!("post-processing task failed: {}", e)))?
    }
}
