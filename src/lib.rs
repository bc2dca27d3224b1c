//! # CXR Analysis
//!
//! An orchestration layer for chest radiograph analysis.
//!
//! Images are registered by path and referred to by opaque ids. Four
//! analysis domains run against registered images, each backed by a model
//! collaborator that is constructed lazily on first use:
//!
//! - **Classification**: multi-label pathology probabilities
//! - **Visual question answering**: free-text answers about one or more images
//! - **Segmentation**: organ masks turned into calibrated geometric metrics
//!   and a color-coded overlay
//! - **DICOM**: rendering to PNG (rescale and windowing) and metadata
//!
//! Every domain shares one result envelope (`status`, `error`,
//! `processing_time_ms`, `timestamp`) and one closed error taxonomy.
//!
//! ## Architecture
//!
//! - [`registry`] - Image id registry
//! - [`analysis`] - Result envelopes and DICOM metadata
//! - [`validation`] - Input validation helpers
//! - [`geometry`] - Mask alignment, organ metrics and the overlay compositor
//! - [`models`] - Collaborator traits and their remote/DICOM backends
//! - [`service`] - Per-domain services and the lazy orchestrator
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use cxr_analysis::{
//!     AnalysisOrchestrator, RemoteModelProvider, RemoteSettings, SegmentationSettings,
//! };
//!
//! # async fn run(settings: RemoteSettings) -> Result<(), Box<dyn std::error::Error>> {
//! let provider = RemoteModelProvider::new(settings)?;
//! let orchestrator = AnalysisOrchestrator::new(provider, SegmentationSettings::default());
//!
//! let image = orchestrator.register_image("/data/cxr.png").await;
//! let result = orchestrator.classify(&image.id, None, 0.5).await?;
//! println!("{:?}", result.positive_findings);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod geometry;
pub mod models;
pub mod registry;
pub mod server;
pub mod service;
pub mod validation;

// Re-export commonly used types
pub use analysis::{
    AnalysisStatus, ClassificationResult, DicomMetadata, DicomResult, Envelope, Finding,
    PixelSpacing, SegmentationResult, VqaResult,
};
pub use config::{BackendArgs, CheckConfig, Cli, Command, ServeConfig};
pub use error::{AnalysisError, BackendError, ErrorDetails};
pub use geometry::{Compositor, Mask, OrganMetrics, RelativePosition};
pub use models::{
    Classifier, DicomFileProcessor, DicomProcessor, ModelProvider, RemoteModelProvider,
    RemoteSettings, SegmentationModel, VisualQa, DEFAULT_ORGANS, DEFAULT_PATHOLOGIES,
};
pub use registry::{ImageEntity, ImageFormat, ImageRegistry};
pub use server::{create_router, create_shared_router, AppState, RouterConfig};
pub use service::{
    AnalysisOrchestrator, ClassificationService, DicomService, SegmentationService,
    SegmentationSettings, ServiceDomain, VqaService,
};
