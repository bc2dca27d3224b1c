//! Per-organ region statistics.
//!
//! Statistics are computed on the aligned mask against the original
//! intensities, never against the model's resized input.

use std::collections::BTreeMap;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Serialize;

use crate::analysis::PixelSpacing;

use super::align::Mask;

/// Original pixel intensities, one channel.
pub type IntensityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Organ names used for the cardiothoracic ratio.
pub const HEART: &str = "Heart";
pub const LEFT_LUNG: &str = "Left Lung";
pub const RIGHT_LUNG: &str = "Right Lung";

/// Normalized centroid position, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelativePosition {
    pub top: f64,
    pub left: f64,
}

/// Descriptive statistics of one organ's largest connected region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganMetrics {
    pub area_pixels: u64,

    /// Physical area; a unitless proxy unless the spacing was calibrated
    pub area_cm2: f64,

    /// (row, col)
    pub centroid: [f64; 2],

    /// (row0, col0, row1, col1), max exclusive
    pub bbox: [u32; 4],

    pub width: u32,

    pub height: u32,

    /// height / max(1, width)
    pub aspect_ratio: f64,

    pub relative_position: RelativePosition,

    pub mean_intensity: f64,

    pub std_intensity: f64,

    /// Peak activation of the mask. A quality proxy, not a probability.
    pub confidence_score: f64,
}

/// Extract the intensity channel of a decoded radiograph.
///
/// Single-channel images keep their native values (16-bit included);
/// colour images contribute their first channel.
pub fn intensity_image(image: &DynamicImage) -> IntensityImage {
    match image {
        DynamicImage::ImageLuma16(gray) => {
            IntensityImage::from_fn(gray.width(), gray.height(), |x, y| {
                Luma([gray.get_pixel(x, y).0[0] as f32])
            })
        }
        DynamicImage::ImageLuma8(gray) => {
            IntensityImage::from_fn(gray.width(), gray.height(), |x, y| {
                Luma([gray.get_pixel(x, y).0[0] as f32])
            })
        }
        other => {
            let rgb = other.to_rgb8();
            IntensityImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                Luma([rgb.get_pixel(x, y).0[0] as f32])
            })
        }
    }
}

/// Binary footprint of a mask: 255 where the activation exceeds `threshold`.
pub fn footprint(mask: &Mask, threshold: f32) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get_pixel(x, y).0[0] > threshold { 255 } else { 0 }])
    })
}

/// Compute metrics for one aligned mask.
///
/// Returns `None` when no pixel exceeds `threshold`: the organ was not
/// segmented, which is not an error.
pub fn compute_organ_metrics(
    mask: &Mask,
    intensities: &IntensityImage,
    spacing: PixelSpacing,
    threshold: f32,
) -> Option<OrganMetrics> {
    debug_assert_eq!(mask.dimensions(), intensities.dimensions());

    let binary = footprint(mask, threshold);
    let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    let label = largest_label(&labels)?;

    let mut region = RegionAccumulator::new();
    for (x, y, l) in labels.enumerate_pixels() {
        if l.0[0] == label {
            let intensity = intensities
                .get_pixel_checked(x, y)
                .map_or(0.0, |p| p.0[0] as f64);
            region.push(y, x, intensity);
        }
    }

    let confidence = mask
        .pixels()
        .map(|p| p.0[0])
        .fold(f32::NEG_INFINITY, f32::max);

    Some(region.finish(
        mask.width(),
        mask.height(),
        spacing,
        confidence as f64,
    ))
}

/// Label of the largest non-background component, lowest label on ties.
fn largest_label(labels: &ImageBuffer<Luma<u32>, Vec<u32>>) -> Option<u32> {
    let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
    for l in labels.pixels() {
        if l.0[0] != 0 {
            *counts.entry(l.0[0]).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(label, _)| label)
}

/// Running sums over the pixels of one region.
struct RegionAccumulator {
    count: u64,
    row_sum: f64,
    col_sum: f64,
    min_row: u32,
    min_col: u32,
    max_row: u32,
    max_col: u32,
    intensity_sum: f64,
    intensity_sq_sum: f64,
}

impl RegionAccumulator {
    fn new() -> Self {
        Self {
            count: 0,
            row_sum: 0.0,
            col_sum: 0.0,
            min_row: u32::MAX,
            min_col: u32::MAX,
            max_row: 0,
            max_col: 0,
            intensity_sum: 0.0,
            intensity_sq_sum: 0.0,
        }
    }

    fn push(&mut self, row: u32, col: u32, intensity: f64) {
        self.count += 1;
        self.row_sum += row as f64;
        self.col_sum += col as f64;
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
        self.intensity_sum += intensity;
        self.intensity_sq_sum += intensity * intensity;
    }

    fn finish(
        self,
        image_width: u32,
        image_height: u32,
        spacing: PixelSpacing,
        confidence: f64,
    ) -> OrganMetrics {
        let n = self.count as f64;
        let cy = self.row_sum / n;
        let cx = self.col_sum / n;

        let bbox = [self.min_row, self.min_col, self.max_row + 1, self.max_col + 1];
        let height = bbox[2] - bbox[0];
        let width = bbox[3] - bbox[1];

        let mean = self.intensity_sum / n;
        let variance = (self.intensity_sq_sum / n - mean * mean).max(0.0);

        OrganMetrics {
            area_pixels: self.count,
            area_cm2: n * spacing.pixel_area_cm2(),
            centroid: [cy, cx],
            bbox,
            width,
            height,
            aspect_ratio: height as f64 / width.max(1) as f64,
            relative_position: RelativePosition {
                top: cy / image_height as f64,
                left: cx / image_width as f64,
            },
            mean_intensity: mean,
            std_intensity: variance.sqrt(),
            confidence_score: confidence,
        }
    }
}

/// Heart width over thoracic width.
///
/// Thoracic width spans both lungs' bounding boxes. `None` unless the heart
/// and both lungs were segmented.
pub fn cardiothoracic_ratio(metrics: &BTreeMap<String, OrganMetrics>) -> Option<f64> {
    let heart = metrics.get(HEART)?;
    let left = metrics.get(LEFT_LUNG)?;
    let right = metrics.get(RIGHT_LUNG)?;

    let thorax_start = left.bbox[1].min(right.bbox[1]);
    let thorax_end = left.bbox[3].max(right.bbox[3]);
    let thorax_width = thorax_end.saturating_sub(thorax_start);
    if thorax_width == 0 {
        return None;
    }

    Some(heart.width as f64 / thorax_width as f64)
}
