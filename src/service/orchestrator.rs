//! Lazy service container.
//!
//! The orchestrator owns the image registry and one slot per analysis
//! domain. A slot is filled the first time its domain is used:
//!
//! ```text
//!   classify() ──▶ classification slot ──empty──▶ provider.load_classifier()
//!                        │                              │
//!                        │◀───────── Arc<Service> ──────┘
//!                        └──filled──▶ reuse
//! ```
//!
//! Each slot is a `tokio::sync::OnceCell`: concurrent first calls wait on
//! a single construction, a failed construction leaves the slot empty so
//! the next call retries, and reads of a filled slot take no lock.
//!
//! Tool calls resolve ids, check that files exist and validate label-free
//! input before a slot is touched, so a bad request never loads a model.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::analysis::{
    ClassificationResult, DicomMetadata, DicomResult, PixelSpacing, SegmentationResult, VqaResult,
};
use crate::error::AnalysisError;
use crate::models::{labels, ModelProvider, DEFAULT_ORGANS, DEFAULT_PATHOLOGIES};
use crate::registry::{ImageEntity, ImageRegistry};
use crate::validation::{
    validate_at_least, validate_non_empty, validate_probability, validate_required,
};

use super::{
    ensure_exists, resolve_image, ClassificationService, DicomService, SegmentationService,
    SegmentationSettings, VqaService,
};

/// The four analysis domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceDomain {
    Classification,
    Vqa,
    Segmentation,
    Dicom,
}

impl ServiceDomain {
    pub const ALL: [ServiceDomain; 4] = [
        ServiceDomain::Classification,
        ServiceDomain::Vqa,
        ServiceDomain::Segmentation,
        ServiceDomain::Dicom,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ServiceDomain::Classification => "classification",
            ServiceDomain::Vqa => "vqa",
            ServiceDomain::Segmentation => "segmentation",
            ServiceDomain::Dicom => "dicom",
        }
    }
}

impl fmt::Display for ServiceDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// AnalysisOrchestrator
// =============================================================================

/// Owns the registry and lazily constructed services.
pub struct AnalysisOrchestrator<P: ModelProvider> {
    provider: P,
    registry: Arc<ImageRegistry>,
    segmentation_settings: SegmentationSettings,

    classification: OnceCell<Arc<ClassificationService>>,
    vqa: OnceCell<Arc<VqaService>>,
    segmentation: OnceCell<Arc<SegmentationService>>,
    dicom: OnceCell<Arc<DicomService>>,
}

impl<P: ModelProvider> AnalysisOrchestrator<P> {
    /// Create an orchestrator with a fresh, empty registry.
    pub fn new(provider: P, segmentation_settings: SegmentationSettings) -> Self {
        Self::with_registry(provider, Arc::new(ImageRegistry::new()), segmentation_settings)
    }

    /// Create an orchestrator around an existing registry.
    pub fn with_registry(
        provider: P,
        registry: Arc<ImageRegistry>,
        segmentation_settings: SegmentationSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            segmentation_settings,
            classification: OnceCell::new(),
            vqa: OnceCell::new(),
            segmentation: OnceCell::new(),
            dicom: OnceCell::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ImageRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Whether a domain's service has been constructed.
    pub fn is_loaded(&self, domain: ServiceDomain) -> bool {
        match domain {
            ServiceDomain::Classification => self.classification.initialized(),
            ServiceDomain::Vqa => self.vqa.initialized(),
            ServiceDomain::Segmentation => self.segmentation.initialized(),
            ServiceDomain::Dicom => self.dicom.initialized(),
        }
    }

    /// Construct every service up front.
    ///
    /// All four domains are attempted; the failures are returned so the
    /// caller can decide whether they are fatal.
    pub async fn initialize_all(&self) -> Vec<(ServiceDomain, AnalysisError)> {
        let mut failures = Vec::new();
        for domain in ServiceDomain::ALL {
            let outcome = match domain {
                ServiceDomain::Classification => self.classification().await.map(|_| ()),
                ServiceDomain::Vqa => self.vqa().await.map(|_| ()),
                ServiceDomain::Segmentation => self.segmentation().await.map(|_| ()),
                ServiceDomain::Dicom => self.dicom().await.map(|_| ()),
            };
            if let Err(e) = outcome {
                warn!(service = %domain, error = %e, "Service failed to initialize");
                failures.push((domain, e));
            }
        }
        failures
    }

    // -------------------------------------------------------------------------
    // Service slots
    // -------------------------------------------------------------------------

    pub async fn classification(&self) -> Result<Arc<ClassificationService>, AnalysisError> {
        self.classification
            .get_or_try_init(|| async {
                let domain = ServiceDomain::Classification;
                let classifier = self
                    .provider
                    .load_classifier()
                    .await
                    .map_err(|e| e.into_construction_error(domain.as_str()))?;
                info!(service = %domain, model = %classifier.model_name(), "Service initialized");
                Ok::<_, AnalysisError>(Arc::new(ClassificationService::new(classifier)))
            })
            .await
            .cloned()
    }

    pub async fn vqa(&self) -> Result<Arc<VqaService>, AnalysisError> {
        self.vqa
            .get_or_try_init(|| async {
                let domain = ServiceDomain::Vqa;
                let model = self
                    .provider
                    .load_visual_qa()
                    .await
                    .map_err(|e| e.into_construction_error(domain.as_str()))?;
                info!(service = %domain, model = %model.model_name(), "Service initialized");
                Ok::<_, AnalysisError>(Arc::new(VqaService::new(model)))
            })
            .await
            .cloned()
    }

    pub async fn segmentation(&self) -> Result<Arc<SegmentationService>, AnalysisError> {
        self.segmentation
            .get_or_try_init(|| async {
                let domain = ServiceDomain::Segmentation;
                let model = self
                    .provider
                    .load_segmentation()
                    .await
                    .map_err(|e| e.into_construction_error(domain.as_str()))?;
                info!(
                    service = %domain,
                    model = %model.model_name(),
                    organs = model.supported_organs().len(),
                    "Service initialized"
                );
                Ok::<_, AnalysisError>(Arc::new(SegmentationService::new(
                    model,
                    self.segmentation_settings.clone(),
                )))
            })
            .await
            .cloned()
    }

    pub async fn dicom(&self) -> Result<Arc<DicomService>, AnalysisError> {
        self.dicom
            .get_or_try_init(|| async {
                let domain = ServiceDomain::Dicom;
                let processor = self
                    .provider
                    .load_dicom()
                    .await
                    .map_err(|e| e.into_construction_error(domain.as_str()))?;
                info!(service = %domain, "Service initialized");
                Ok::<_, AnalysisError>(Arc::new(DicomService::new(processor, self.registry.clone())))
            })
            .await
            .cloned()
    }

    // -------------------------------------------------------------------------
    // Tool surface
    // -------------------------------------------------------------------------

    /// Register an image path and return its entity.
    pub async fn register_image(&self, image_path: impl AsRef<Path>) -> ImageEntity {
        self.registry.store(image_path).await
    }

    pub async fn get_image(&self, image_id: &str) -> Result<ImageEntity, AnalysisError> {
        resolve_image(&self.registry, image_id).await
    }

    pub async fn delete_image(&self, image_id: &str) -> bool {
        self.registry.delete(image_id).await
    }

    pub async fn list_images(&self) -> Vec<String> {
        self.registry.list_all().await
    }

    pub async fn classify(
        &self,
        image_id: &str,
        pathologies: Option<&[String]>,
        threshold: f64,
    ) -> Result<ClassificationResult, AnalysisError> {
        let entity = resolve_image(&self.registry, image_id).await?;
        validate_probability("threshold", threshold)?;
        ensure_exists(&entity.path).await?;

        self.classification()
            .await?
            .classify(&entity, pathologies, threshold)
            .await
    }

    pub async fn ask(
        &self,
        image_ids: &[String],
        question: &str,
        max_tokens: usize,
    ) -> Result<VqaResult, AnalysisError> {
        validate_required("image_ids", image_ids, "image ID")?;
        let question = validate_non_empty("question", question)?;
        validate_at_least("max_tokens", max_tokens, 1)?;

        let mut paths: Vec<PathBuf> = Vec::with_capacity(image_ids.len());
        for id in image_ids {
            paths.push(resolve_image(&self.registry, id).await?.path);
        }
        for path in &paths {
            ensure_exists(path).await?;
        }

        self.vqa().await?.answer(&paths, question, max_tokens).await
    }

    pub async fn segment(
        &self,
        image_id: &str,
        organs: Option<&[String]>,
        pixel_spacing: Option<PixelSpacing>,
    ) -> Result<SegmentationResult, AnalysisError> {
        let entity = resolve_image(&self.registry, image_id).await?;
        if let Some(spacing) = pixel_spacing {
            if !spacing.is_valid() {
                return Err(AnalysisError::validation(
                    "pixel_spacing_mm",
                    "Must be positive",
                    Some(spacing.to_string()),
                ));
            }
        }
        ensure_exists(&entity.path).await?;

        self.segmentation()
            .await?
            .segment(&entity, organs, pixel_spacing)
            .await
    }

    pub async fn process_dicom(
        &self,
        dicom_path: &str,
        window_center: Option<f64>,
        window_width: Option<f64>,
    ) -> Result<DicomResult, AnalysisError> {
        if let Some(width) = window_width {
            if width.is_nan() || width <= 0.0 {
                return Err(AnalysisError::validation(
                    "window_width",
                    "Must be positive",
                    Some(width.to_string()),
                ));
            }
        }
        ensure_exists(Path::new(dicom_path)).await?;

        self.dicom()
            .await?
            .process(dicom_path, window_center, window_width)
            .await
    }

    pub async fn dicom_metadata(&self, dicom_path: &str) -> Result<DicomMetadata, AnalysisError> {
        ensure_exists(Path::new(dicom_path)).await?;
        self.dicom().await?.metadata(dicom_path).await
    }

    /// Pathologies the classifier reports. The default label set until the
    /// classifier has been loaded; listing never loads it.
    pub fn supported_pathologies(&self) -> Vec<String> {
        match self.classification.get() {
            Some(service) => service.supported_pathologies().to_vec(),
            None => labels(&DEFAULT_PATHOLOGIES),
        }
    }

    /// Organs the segmenter reports, with the same fallback as
    /// [`supported_pathologies`](Self::supported_pathologies).
    pub fn supported_organs(&self) -> Vec<String> {
        match self.segmentation.get() {
            Some(service) => service.supported_organs().to_vec(),
            None => labels(&DEFAULT_ORGANS),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
