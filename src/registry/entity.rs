use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::PixelSpacing;

/// Image container format, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Dicom,
    Unknown,
}

impl ImageFormat {
    /// Detect the format from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("png") => ImageFormat::Png,
            Some("jpg") | Some("jpeg") => ImageFormat::Jpeg,
            Some("dcm") | Some("dicom") => ImageFormat::Dicom,
            _ => ImageFormat::Unknown,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Dicom => "dicom",
            ImageFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered image. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageEntity {
    /// Opaque identifier, `img_` followed by 12 hex characters
    pub id: String,

    /// Path on the local filesystem, exactly as registered
    pub path: PathBuf,

    pub format: ImageFormat,

    pub created_at: DateTime<Utc>,

    /// Calibration carried over from DICOM rendering, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_spacing: Option<PixelSpacing>,
}

impl ImageEntity {
    /// Whether the backing file currently exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn is_dicom(&self) -> bool {
        self.format == ImageFormat::Dicom
    }
}
