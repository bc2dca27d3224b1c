//! Local DICOM handling.
//!
//! Metadata comes from `dicom-object`, pixels from `dicom-pixeldata`.
//! Rendering maps the first frame to an 8-bit grayscale PNG:
//!
//! ```text
//!   raw ──▶ rescale (slope/intercept) ──▶ window/level ──▶ u8 PNG
//!                                     └─▶ min-max (no window known)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dicom_core::Tag;
use dicom_object::{open_file, DefaultDicomObject};
use dicom_pixeldata::PixelDecoder;
use image::GrayImage;
use tracing::debug;
use uuid::Uuid;

use crate::analysis::{DicomMetadata, PixelSpacing};
use crate::error::BackendError;

use super::DicomProcessor;

// Tags
pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
pub const MODALITY: Tag = Tag(0x0008, 0x0060);
pub const MANUFACTURER: Tag = Tag(0x0008, 0x0070);
pub const IMAGE_POSITION_PATIENT: Tag = Tag(0x0020, 0x0032);
pub const IMAGE_ORIENTATION_PATIENT: Tag = Tag(0x0020, 0x0037);
pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
pub const BITS_STORED: Tag = Tag(0x0028, 0x0101);
pub const PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
pub const WINDOW_CENTER: Tag = Tag(0x0028, 0x1050);
pub const WINDOW_WIDTH: Tag = Tag(0x0028, 0x1051);
pub const RESCALE_INTERCEPT: Tag = Tag(0x0028, 0x1052);
pub const RESCALE_SLOPE: Tag = Tag(0x0028, 0x1053);

/// Renders DICOM files into a temp directory.
#[derive(Debug, Clone)]
pub struct DicomFileProcessor {
    output_dir: PathBuf,
}

impl DicomFileProcessor {
    /// Create a processor writing into `output_dir`, creating it if needed.
    pub async fn create(output_dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let output_dir = output_dir.into();
        tokio::fs::create_dir_all(&output_dir).await?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl DicomProcessor for DicomFileProcessor {
    async fn process(
        &self,
        dicom_path: &Path,
        window_center: Option<f64>,
        window_width: Option<f64>,
    ) -> Result<(PathBuf, DicomMetadata), BackendError> {
        let dicom_path = dicom_path.to_path_buf();
        let output_path = self
            .output_dir
            .join(format!("dicom_{}.png", &Uuid::new_v4().simple().to_string()[..8]));

        let target = output_path.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            render_file(&dicom_path, &target, window_center, window_width)
        })
        .await
        .map_err(|e| BackendError::Inference(format!("render task failed: {}", e)))??;

        debug!(path = %output_path.display(), "Rendered DICOM");
        Ok((output_path, metadata))
    }

    async fn extract_metadata(&self, dicom_path: &Path) -> Result<DicomMetadata, BackendError> {
        let dicom_path = dicom_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let obj = open_dicom(&dicom_path)?;
            Ok(read_metadata(&obj))
        })
        .await
        .map_err(|e| BackendError::Inference(format!("metadata task failed: {}", e)))?
    }
}

fn unsupported() -> BackendError {
    BackendError::UnsupportedFormat {
        format: "unknown".to_string(),
    }
}

fn open_dicom(path: &Path) -> Result<DefaultDicomObject, BackendError> {
    open_file(path).map_err(|e| {
        debug!(path = %path.display(), error = %e, "Not a readable DICOM file");
        unsupported()
    })
}

// =============================================================================
// Metadata
// =============================================================================

fn string_value(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn floats_value(obj: &DefaultDicomObject, tag: Tag) -> Option<Vec<f64>> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_multi_float64().ok())
        .filter(|v| !v.is_empty())
}

/// First value of a possibly multi-valued numeric tag.
fn first_float(obj: &DefaultDicomObject, tag: Tag) -> Option<f64> {
    floats_value(obj, tag).and_then(|v| v.first().copied())
}

fn u16_value(obj: &DefaultDicomObject, tag: Tag) -> Option<u16> {
    obj.element(tag).ok().and_then(|e| e.to_int::<u16>().ok())
}

fn read_metadata(obj: &DefaultDicomObject) -> DicomMetadata {
    let pixel_spacing = floats_value(obj, PIXEL_SPACING)
        .filter(|v| v.len() >= 2)
        .map(|v| PixelSpacing::new(v[0], v[1]))
        .filter(PixelSpacing::is_valid);

    DicomMetadata {
        patient_id: string_value(obj, PATIENT_ID),
        study_date: string_value(obj, STUDY_DATE),
        modality: string_value(obj, MODALITY),
        pixel_spacing,
        window_center: first_float(obj, WINDOW_CENTER),
        window_width: first_float(obj, WINDOW_WIDTH),
        bits_stored: u16_value(obj, BITS_STORED),
        manufacturer: string_value(obj, MANUFACTURER),
        image_orientation: floats_value(obj, IMAGE_ORIENTATION_PATIENT),
        image_position: floats_value(obj, IMAGE_POSITION_PATIENT),
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn render_file(
    dicom_path: &Path,
    output_path: &Path,
    window_center: Option<f64>,
    window_width: Option<f64>,
) -> Result<DicomMetadata, BackendError> {
    let obj = open_dicom(dicom_path)?;
    let metadata = read_metadata(&obj);

    let decoded = obj.decode_pixel_data().map_err(|e| {
        debug!(path = %dicom_path.display(), error = %e, "Pixel data could not be decoded");
        unsupported()
    })?;

    let rows = decoded.rows() as usize;
    let columns = decoded.columns() as usize;
    let samples = decoded.samples_per_pixel() as usize;
    let bits_allocated = decoded.bits_allocated();
    let signed = u16_value(&obj, PIXEL_REPRESENTATION) == Some(1);

    let mut values = first_frame_values(decoded.data(), rows * columns, samples, bits_allocated, signed)?;

    if let (Some(slope), Some(intercept)) = (
        first_float(&obj, RESCALE_SLOPE),
        first_float(&obj, RESCALE_INTERCEPT),
    ) {
        rescale(&mut values, slope, intercept);
    }

    let center = window_center.or(metadata.window_center);
    let width = window_width.or(metadata.window_width);
    let pixels = match (center, width) {
        (Some(c), Some(w)) if w > 0.0 => apply_window(&values, c, w),
        _ => normalize_min_max(&values),
    };

    let image = GrayImage::from_raw(columns as u32, rows as u32, pixels)
        .ok_or_else(|| BackendError::Inference("pixel buffer does not match dimensions".into()))?;
    image.save(output_path)?;

    Ok(metadata)
}

/// First sample of every pixel of the first frame, as `f64`.
fn first_frame_values(
    data: &[u8],
    pixel_count: usize,
    samples: usize,
    bits_allocated: u16,
    signed: bool,
) -> Result<Vec<f64>, BackendError> {
    let bytes_per_sample = match bits_allocated {
        8 => 1,
        16 => 2,
        32 => 4,
        other => {
            return Err(BackendError::Inference(format!(
                "unsupported BitsAllocated: {}",
                other
            )))
        }
    };
    let stride = bytes_per_sample * samples.max(1);
    if data.len() < pixel_count * stride {
        return Err(BackendError::Inference(format!(
            "pixel data holds {} bytes, expected at least {}",
            data.len(),
            pixel_count * stride
        )));
    }

    let values = data
        .chunks_exact(stride)
        .take(pixel_count)
        .map(|px| match (bytes_per_sample, signed) {
            (1, false) => px[0] as f64,
            (1, true) => px[0] as i8 as f64,
            (2, false) => u16::from_le_bytes([px[0], px[1]]) as f64,
            (2, true) => i16::from_le_bytes([px[0], px[1]]) as f64,
            (_, false) => u32::from_le_bytes([px[0], px[1], px[2], px[3]]) as f64,
            (_, true) => i32::from_le_bytes([px[0], px[1], px[2], px[3]]) as f64,
        })
        .collect();
    Ok(values)
}

fn rescale(values: &mut [f64], slope: f64, intercept: f64) {
    for v in values.iter_mut() {
        *v = *v * slope + intercept;
    }
}

/// Window/level to 8 bits.
///
/// `lo = c - floor(w/2)`, `hi = c + floor(w/2)`; values are clipped to
/// `[lo, hi]` then mapped by `(v - lo) / w * 255`, truncated.
pub fn apply_window(values: &[f64], center: f64, width: f64) -> Vec<u8> {
    let half = (width / 2.0).floor();
    let lo = center - half;
    let hi = center + half;
    values
        .iter()
        .map(|&v| {
            let clipped = v.clamp(lo, hi);
            ((clipped - lo) / width * 255.0).clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Stretch the value range to 0..=255. A flat image renders black.
pub fn normalize_min_max(values: &[f64]) -> Vec<u8> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![0; values.len()];
    }
    values
        .iter()
        .map(|&v| ((v - min) / range * 255.0) as u8)
        .collect()
}
