//! Segmentation post-processing.
//!
//! Raw masks flow through three pure stages:
//!
//! ```text
//!   model-space masks ──▶ align ──▶ metrics ──▶ render ──▶ base64 PNG
//!                       (crop-inverse) (per organ)  (one overlay)
//! ```
//!
//! Nothing here does I/O; callers run it on a blocking thread.

mod align;
mod metrics;
mod pipeline;
mod render;

pub use align::{align_to_original, align_with_crop, resize_nearest, CropWindow, Mask};
pub use metrics::{
    cardiothoracic_ratio, compute_organ_metrics, footprint, intensity_image, IntensityImage,
    OrganMetrics, RelativePosition, HEART, LEFT_LUNG, RIGHT_LUNG,
};
pub use pipeline::{process_masks, SegmentationGeometry};
pub use render::{
    encode_png_base64, load_font, organ_color, Compositor, OverlayLayer, DEFAULT_OVERLAY_ALPHA,
};
