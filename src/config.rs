//! Configuration management for the analysis server.
//!
//! Options come from command-line arguments via clap, with environment
//! variable fallbacks under the `CXR_` prefix and defaults for everything
//! else.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use cxr_analysis::config::{Cli, Command};
//!
//! match Cli::parse().command {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Check(config) => println!("Checking {}", config.backend.inference_url),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `CXR_HOST` - Server bind address (default: 0.0.0.0)
//! - `CXR_PORT` - Server port (default: 8000)
//! - `CXR_INFERENCE_URL` - Inference backend base URL
//! - `CXR_DEVICE` - Device hint forwarded to the backend (cuda, cpu, mps)
//! - `CXR_TEMP_DIR` - Directory for rendered DICOM images (default: temp)
//! - `CXR_EAGER_LOAD` - Construct every service at startup
//! - `CXR_CLASSIFIER_MODEL`, `CXR_VQA_MODEL`, `CXR_SEGMENTATION_MODEL` - Model names
//! - `CXR_PIXEL_SPACING_MM` - Fallback calibration (default: 0.2)
//! - `CXR_ACTIVATION_THRESHOLD` - Mask activation threshold (default: 0.5)
//! - `CXR_OVERLAY_ALPHA` - Overlay opacity (default: 0.3)
//! - `CXR_LABEL_FONT` - TTF/OTF font overriding the bundled label font
//! - `CXR_REQUEST_TIMEOUT`, `CXR_MODEL_TIMEOUT` - Seconds
//! - `CXR_CORS_ORIGINS` - Comma-separated allowed origins

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::analysis::PixelSpacing;
use crate::geometry::{Compositor, DEFAULT_OVERLAY_ALPHA};
use crate::models::RemoteSettings;
use crate::server::RouterConfig;
use crate::service::SegmentationSettings;

// =============================================================================
// Default Values
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 8000;

pub const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:8500";

pub const DEFAULT_TEMP_DIR: &str = "temp";

pub const DEFAULT_CLASSIFIER_MODEL: &str = "densenet121-res224-all";

pub const DEFAULT_VQA_MODEL: &str = "StanfordAIMI/CheXagent-2-3b";

pub const DEFAULT_SEGMENTATION_MODEL: &str = "chestx_det-pspnet";

/// Typical chest radiograph detector pitch, in millimeters.
pub const DEFAULT_PIXEL_SPACING_MM: f64 = 0.2;

pub const DEFAULT_ACTIVATION_THRESHOLD: f32 = 0.5;

/// Seconds.
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 300;

/// Seconds. Below the request timeout.
pub const DEFAULT_MODEL_TIMEOUT: u64 = 240;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Chest radiograph analysis server.
#[derive(Parser, Debug, Clone)]
#[command(name = "cxr-analysis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeConfig),

    /// Check that the inference backend is reachable
    Check(CheckConfig),
}

/// Model backend options shared by `serve` and `check`.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Base URL of the inference backend.
    #[arg(long, default_value = DEFAULT_INFERENCE_URL, env = "CXR_INFERENCE_URL")]
    pub inference_url: String,

    /// Device hint forwarded to the backend (cuda, cpu, mps).
    #[arg(long, env = "CXR_DEVICE")]
    pub device: Option<String>,

    /// Directory for rendered DICOM images.
    #[arg(long, default_value = DEFAULT_TEMP_DIR, env = "CXR_TEMP_DIR")]
    pub temp_dir: PathBuf,

    /// Classification model name.
    #[arg(long, default_value = DEFAULT_CLASSIFIER_MODEL, env = "CXR_CLASSIFIER_MODEL")]
    pub classifier_model: String,

    /// Visual question answering model name.
    #[arg(long, default_value = DEFAULT_VQA_MODEL, env = "CXR_VQA_MODEL")]
    pub vqa_model: String,

    /// Segmentation model name.
    #[arg(long, default_value = DEFAULT_SEGMENTATION_MODEL, env = "CXR_SEGMENTATION_MODEL")]
    pub segmentation_model: String,

    /// Timeout for a single model call, in seconds.
    #[arg(long, default_value_t = DEFAULT_MODEL_TIMEOUT, env = "CXR_MODEL_TIMEOUT")]
    pub model_timeout: u64,
}

impl BackendArgs {
    pub fn remote_settings(&self) -> RemoteSettings {
        RemoteSettings {
            base_url: self.inference_url.clone(),
            device: self.device.clone(),
            classifier_model: self.classifier_model.clone(),
            vqa_model: self.vqa_model.clone(),
            segmentation_model: self.segmentation_model.clone(),
            timeout: Duration::from_secs(self.model_timeout),
            temp_dir: self.temp_dir.clone(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.inference_url.trim().is_empty() {
            return Err(
                "Inference URL is required. Set --inference-url or CXR_INFERENCE_URL".to_string(),
            );
        }
        if self.model_timeout == 0 {
            return Err("model_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "CXR_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "CXR_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub backend: BackendArgs,

    /// Construct every analysis service at startup instead of on first use.
    #[arg(long, default_value_t = false, env = "CXR_EAGER_LOAD")]
    pub eager_load: bool,

    /// Pixel spacing in millimeters used when an image carries none.
    #[arg(long, default_value_t = DEFAULT_PIXEL_SPACING_MM, env = "CXR_PIXEL_SPACING_MM")]
    pub pixel_spacing_mm: f64,

    /// Mask values above this are part of an organ.
    #[arg(
        long,
        default_value_t = DEFAULT_ACTIVATION_THRESHOLD,
        env = "CXR_ACTIVATION_THRESHOLD"
    )]
    pub activation_threshold: f32,

    /// Opacity of organ overlays in the visualization.
    #[arg(long, default_value_t = DEFAULT_OVERLAY_ALPHA, env = "CXR_OVERLAY_ALPHA")]
    pub overlay_alpha: f32,

    /// Font file used to draw organ labels instead of the bundled DejaVu Sans.
    #[arg(long, env = "CXR_LABEL_FONT")]
    pub label_font: Option<PathBuf>,

    /// Timeout for a whole HTTP request, in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT, env = "CXR_REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    /// Allowed CORS origins (comma-separated). Any origin when unset.
    #[arg(long, env = "CXR_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.backend.validate()?;

        if !(self.activation_threshold > 0.0 && self.activation_threshold < 1.0) {
            return Err("activation_threshold must be between 0 and 1 (exclusive)".to_string());
        }
        if !(self.overlay_alpha > 0.0 && self.overlay_alpha <= 1.0) {
            return Err("overlay_alpha must be in (0, 1]".to_string());
        }
        if !PixelSpacing::isotropic(self.pixel_spacing_mm).is_valid() {
            return Err("pixel_spacing_mm must be greater than 0".to_string());
        }
        if self.request_timeout == 0 {
            return Err("request_timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Segmentation post-processing settings with the bundled label font.
    /// A `--label-font` override is attached by the caller once loaded.
    pub fn segmentation_settings(&self) -> SegmentationSettings {
        SegmentationSettings {
            default_spacing: PixelSpacing::isotropic(self.pixel_spacing_mm),
            activation_threshold: self.activation_threshold,
            compositor: Compositor::new(self.overlay_alpha, self.activation_threshold),
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        let mut router_config = RouterConfig::default()
            .with_request_timeout(Duration::from_secs(self.request_timeout))
            .with_tracing(!self.no_tracing);

        if let Some(ref origins) = self.cors_origins {
            router_config = router_config.with_cors_origins(origins.clone());
        }

        router_config
    }
}

// =============================================================================
// Check
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Also ask the backend to load every model.
    #[arg(long, default_value_t = false)]
    pub load: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.backend.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
