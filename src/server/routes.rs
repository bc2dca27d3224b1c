//! Router configuration for the analysis API.
//!
//! # Route Structure
//!
//! ```text
//! /health                 GET     - Liveness and loaded services
//! /images                 GET     - List registered image ids
//! /images                 POST    - Register an image path
//! /images/{image_id}      GET     - Registered entity
//! /images/{image_id}      DELETE  - Forget a registration
//! /classify               POST    - Pathology classification
//! /ask                    POST    - Visual question answering
//! /segment                POST    - Anatomical segmentation
//! /dicom/process          POST    - Render DICOM to PNG and register it
//! /dicom/metadata         POST    - Read DICOM metadata
//! /pathologies            GET     - Supported pathologies
//! /organs                 GET     - Supported organs
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cxr_analysis::server::{create_router, RouterConfig};
//! use cxr_analysis::service::{AnalysisOrchestrator, SegmentationSettings};
//!
//! let orchestrator = AnalysisOrchestrator::new(provider, SegmentationSettings::default());
//! let router = create_router(orchestrator, RouterConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    ask_handler, classify_handler, delete_image_handler, dicom_metadata_handler,
    get_image_handler, health_handler, list_images_handler, organs_handler, pathologies_handler,
    process_dicom_handler, register_image_handler, segment_handler, AppState,
};
use crate::models::ModelProvider;
use crate::service::AnalysisOrchestrator;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Upper bound on a single request, model calls included
    pub request_timeout: Duration,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    /// Any origin, 5 minute timeout, tracing on.
    fn default() -> Self {
        Self {
            cors_origins: None,
            request_timeout: Duration::from_secs(300),
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router around an orchestrator.
pub fn create_router<P: ModelProvider>(
    orchestrator: AnalysisOrchestrator<P>,
    config: RouterConfig,
) -> Router {
    create_shared_router(Arc::new(orchestrator), config)
}

/// Create the router around an orchestrator that is also used elsewhere
/// (for example eagerly initialised at startup).
pub fn create_shared_router<P: ModelProvider>(
    orchestrator: Arc<AnalysisOrchestrator<P>>,
    config: RouterConfig,
) -> Router {
    let app_state = AppState::from_shared(orchestrator);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler::<P>))
        .route(
            "/images",
            get(list_images_handler::<P>).post(register_image_handler::<P>),
        )
        .route(
            "/images/{image_id}",
            get(get_image_handler::<P>).delete(delete_image_handler::<P>),
        )
        .route("/classify", post(classify_handler::<P>))
        .route("/ask", post(ask_handler::<P>))
        .route("/segment", post(segment_handler::<P>))
        .route("/dicom/process", post(process_dicom_handler::<P>))
        .route("/dicom/metadata", post(dicom_metadata_handler::<P>))
        .route("/pathologies", get(pathologies_handler::<P>))
        .route("/organs", get(organs_handler::<P>))
        .with_state(app_state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
