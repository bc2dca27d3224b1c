//! HTTP server layer.
//!
//! Exposes the orchestrator's tool surface as JSON endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        POST /classify   POST /segment   POST /ask   ...         │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (bodies, error mapping)  │  │ (router, CORS, timeout)     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └────────────────────────────────┬────────────────────────────────┘
//!                                  ▼
//!                        AnalysisOrchestrator
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    status_for, AppState, AskRequest, ClassifyRequest, DeleteImageResponse, DicomMetadataRequest,
    HealthResponse, ImagesResponse, OrgansResponse, PathologiesResponse, ProcessDicomRequest,
    RegisterImageRequest, RegisterImageResponse, SegmentRequest, DEFAULT_THRESHOLD,
};
pub use routes::{create_router, create_shared_router, RouterConfig};
