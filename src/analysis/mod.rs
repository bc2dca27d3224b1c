//! Data model shared by the analysis services.
//!
//! - `result` - Result envelopes (`Pending` → `Completed` | `Failed`)
//! - `dicom` - DICOM metadata and pixel spacing

mod dicom;
mod result;

pub use dicom::{DicomMetadata, PixelSpacing};
pub use result::{
    positive_findings, top_findings, AnalysisStatus, ClassificationResult, DicomResult, Envelope,
    Finding, SegmentationResult, VqaResult, TOP_FINDINGS,
};
