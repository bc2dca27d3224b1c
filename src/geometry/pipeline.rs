use std::collections::BTreeMap;

use image::{DynamicImage, ImageResult};
use tracing::debug;

use crate::analysis::PixelSpacing;

use super::align::{align_with_crop, CropWindow, Mask};
use super::metrics::{cardiothoracic_ratio, compute_organ_metrics, intensity_image, OrganMetrics};
use super::render::{Compositor, OverlayLayer};

/// Everything derived from one segmentation call.
#[derive(Debug, Clone)]
pub struct SegmentationGeometry {
    /// Organs with a non-empty mask, in request order
    pub organs_segmented: Vec<String>,
    pub organ_metrics: BTreeMap<String, OrganMetrics>,
    pub cardiothoracic_ratio: Option<f64>,
    /// Base64 PNG overlay
    pub visualization: String,
}

/// Align, measure and render the requested organ masks.
///
/// `masks` are in model space, in the order the caller requested them.
/// All masks share one crop window derived from `original`.
pub fn process_masks(
    original: &DynamicImage,
    masks: &[(String, Mask)],
    spacing: PixelSpacing,
    activation_threshold: f32,
    compositor: &Compositor,
) -> ImageResult<SegmentationGeometry> {
    let (width, height) = (original.width(), original.height());
    let crop = CropWindow::center_square(width, height);
    let intensities = intensity_image(original);

    let aligned: Vec<(&str, Mask)> = masks
        .iter()
        .map(|(name, mask)| (name.as_str(), align_with_crop(mask, crop, width, height)))
        .collect();

    let mut organs_segmented = Vec::new();
    let mut organ_metrics = BTreeMap::new();
    let mut anchors = Vec::with_capacity(aligned.len());

    for (name, mask) in &aligned {
        match compute_organ_metrics(mask, &intensities, spacing, activation_threshold) {
            Some(metrics) => {
                anchors.push(Some(metrics.centroid));
                organs_segmented.push(name.to_string());
                organ_metrics.insert(name.to_string(), metrics);
            }
            None => {
                debug!(organ = %name, "Organ not segmented");
                anchors.push(None);
            }
        }
    }

    let layers: Vec<OverlayLayer<'_>> = aligned
        .iter()
        .zip(anchors)
        .map(|((name, mask), anchor)| OverlayLayer {
            name: *name,
            mask,
            anchor,
        })
        .collect();

    let visualization = compositor.render_base64(&original.to_luma8(), &layers)?;

    Ok(SegmentationGeometry {
        cardiothoracic_ratio: cardiothoracic_ratio(&organ_metrics),
        organs_segmented,
        organ_metrics,
        visualization,
    })
}
