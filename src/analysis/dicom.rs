//! DICOM-derived metadata carried through the analysis pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pixel spacing in millimeters (row, column).
///
/// Physical distance between adjacent pixel centres. Serialized as a
/// two-element array `[row, col]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 2]", from = "[f64; 2]")]
pub struct PixelSpacing {
    pub row: f64,
    pub col: f64,
}

impl PixelSpacing {
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    /// Same spacing along both axes.
    pub fn isotropic(mm: f64) -> Self {
        Self { row: mm, col: mm }
    }

    /// Physical area of one pixel in cm².
    pub fn pixel_area_cm2(&self) -> f64 {
        (self.row / 10.0) * (self.col / 10.0)
    }

    /// Both components are finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.row.is_finite() && self.col.is_finite() && self.row > 0.0 && self.col > 0.0
    }
}

impl From<PixelSpacing> for [f64; 2] {
    fn from(spacing: PixelSpacing) -> Self {
        [spacing.row, spacing.col]
    }
}

impl From<[f64; 2]> for PixelSpacing {
    fn from([row, col]: [f64; 2]) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for PixelSpacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} mm", self.row, self.col)
    }
}

/// Metadata extracted from a DICOM file.
///
/// Every field is optional: radiographs in the wild routinely omit
/// window settings, spacing and equipment tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DicomMetadata {
    pub patient_id: Option<String>,
    pub study_date: Option<String>,
    pub modality: Option<String>,
    pub pixel_spacing: Option<PixelSpacing>,
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,
    pub bits_stored: Option<u16>,
    pub manufacturer: Option<String>,
    pub image_orientation: Option<Vec<f64>>,
    pub image_position: Option<Vec<f64>>,
}
