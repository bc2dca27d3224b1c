use serde_json::{json, Map, Value};
use thiserror::Error;

/// Structured details attached to every [`AnalysisError`].
pub type ErrorDetails = Map<String, Value>;

// =============================================================================
// AnalysisError
// =============================================================================

/// Closed set of failure kinds shared by every analysis service.
///
/// Each variant renders a human-readable message through `Display` and a
/// structured details map through [`AnalysisError::details`]. Together they
/// form the `{error, kind, details}` body returned to callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Unknown image id, or a registered path that no longer exists on disk
    #[error("{}", image_not_found_message(.image_id.as_deref(), .image_path.as_deref()))]
    ImageNotFound {
        image_id: Option<String>,
        image_path: Option<String>,
    },

    /// Caller input rejected before any expensive work ran
    #[error("Validation error for '{field}': {message}")]
    Validation {
        field: String,
        message: String,
        value: Option<String>,
    },

    /// A model collaborator failed
    #[error("Model '{model}' error: {message}")]
    Model {
        model: String,
        message: String,
        cause: Option<String>,
    },

    /// Input file is not in a format the collaborator understands
    #[error("Unsupported format: {format}")]
    UnsupportedFormat {
        format: String,
        supported: Vec<String>,
    },

    /// A scarce resource (accelerator memory, ...) ran out
    #[error("{}", or_default_message(.message.as_deref(), "Resource exhausted", .resource))]
    ResourceExhausted {
        resource: String,
        message: Option<String>,
    },

    /// A service could not be constructed or reached
    #[error("{}", or_default_message(.message.as_deref(), "Service unavailable", .service))]
    ServiceUnavailable {
        service: String,
        message: Option<String>,
    },
}

fn image_not_found_message(image_id: Option<&str>, image_path: Option<&str>) -> String {
    match (image_id, image_path) {
        (_, Some(path)) => format!("Image file not found: {}", path),
        (Some(id), None) => format!("Image not found: {}", id),
        (None, None) => "Image not found".to_string(),
    }
}

fn or_default_message(message: Option<&str>, prefix: &str, subject: &str) -> String {
    match message {
        Some(message) => message.to_string(),
        None => format!("{}: {}", prefix, subject),
    }
}

impl AnalysisError {
    /// An id that the registry does not know.
    pub fn unknown_image(image_id: impl Into<String>) -> Self {
        AnalysisError::ImageNotFound {
            image_id: Some(image_id.into()),
            image_path: None,
        }
    }

    /// A path that does not exist on disk.
    pub fn missing_file(image_path: impl Into<String>) -> Self {
        AnalysisError::ImageNotFound {
            image_id: None,
            image_path: Some(image_path.into()),
        }
    }

    pub fn validation(
        field: impl Into<String>,
        message: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        AnalysisError::Validation {
            field: field.into(),
            message: message.into(),
            value,
        }
    }

    pub fn model(model: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::Model {
            model: model.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::ServiceUnavailable {
            service: service.into(),
            message: Some(message.into()),
        }
    }

    /// Stable snake_case identifier of the error kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            AnalysisError::ImageNotFound { .. } => "image_not_found",
            AnalysisError::Validation { .. } => "validation_error",
            AnalysisError::Model { .. } => "model_error",
            AnalysisError::UnsupportedFormat { .. } => "unsupported_format",
            AnalysisError::ResourceExhausted { .. } => "resource_exhausted",
            AnalysisError::ServiceUnavailable { .. } => "service_unavailable",
        }
    }

    /// Structured details for the error body.
    pub fn details(&self) -> ErrorDetails {
        let mut details = Map::new();
        match self {
            AnalysisError::ImageNotFound {
                image_id,
                image_path,
            } => {
                if let Some(id) = image_id {
                    details.insert("image_id".into(), json!(id));
                }
                if let Some(path) = image_path {
                    details.insert("image_path".into(), json!(path));
                }
            }
            AnalysisError::Validation { field, value, .. } => {
                details.insert("field".into(), json!(field));
                if let Some(value) = value {
                    details.insert("value".into(), json!(value));
                }
            }
            AnalysisError::Model { model, cause, .. } => {
                details.insert("model_name".into(), json!(model));
                if let Some(cause) = cause {
                    details.insert("original_error".into(), json!(cause));
                }
            }
            AnalysisError::UnsupportedFormat { format, supported } => {
                details.insert("format".into(), json!(format));
                details.insert("supported_formats".into(), json!(supported));
            }
            AnalysisError::ResourceExhausted { resource, .. } => {
                details.insert("resource".into(), json!(resource));
            }
            AnalysisError::ServiceUnavailable { service, .. } => {
                details.insert("service".into(), json!(service));
            }
        }
        details
    }

    /// The `{error, kind, details}` body shown to callers.
    pub fn to_body(&self) -> Value {
        json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "details": self.details(),
        })
    }
}

// =============================================================================
// BackendError
// =============================================================================

/// Errors raised by model collaborators before they are mapped into the
/// [`AnalysisError`] taxonomy.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Transport failure talking to the inference server
    #[error("Connection error: {0}")]
    Connection(String),

    /// The inference server answered with a non-success status
    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The inference server answered with a payload we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Accelerator memory or another scarce resource is exhausted
    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    /// The file could not be decoded by the collaborator
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    /// Local I/O failure (reading inputs, writing rendered outputs)
    #[error("I/O error: {0}")]
    Io(String),

    /// Any other failure inside the model or its post-processing
    #[error("{0}")]
    Inference(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<image::ImageError> for BackendError {
    fn from(err: image::ImageError) -> Self {
        BackendError::Inference(format!("image error: {}", err))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            BackendError::Connection(err.to_string())
        }
    }
}

impl BackendError {
    /// Map a failure that happened while constructing a service.
    pub fn into_construction_error(self, service: &str) -> AnalysisError {
        match self {
            BackendError::ResourceExhausted { resource } => AnalysisError::ResourceExhausted {
                message: Some(format!(
                    "Resource exhausted while loading {}: {}",
                    service, resource
                )),
                resource,
            },
            other => AnalysisError::ServiceUnavailable {
                service: service.to_string(),
                message: Some(format!("Service unavailable: {} ({})", service, other)),
            },
        }
    }

    /// Map a failure that happened during a model call.
    pub fn into_model_error(self, model: &str) -> AnalysisError {
        let cause = self.to_string();
        AnalysisError::Model {
            model: model.to_string(),
            message: cause.clone(),
            cause: Some(cause),
        }
    }
}
