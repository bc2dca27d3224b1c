//! Chest radiograph analysis server.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cxr_analysis::{
    config::{CheckConfig, Cli, Command, ServeConfig},
    geometry::load_font,
    models::{ModelProvider, RemoteModelProvider},
    server::create_shared_router,
    service::{AnalysisOrchestrator, ServiceDomain},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    info!("Configuration:");
    info!("  Inference backend: {}", config.backend.inference_url);
    if let Some(ref device) = config.backend.device {
        info!("  Device: {}", device);
    }
    info!("  Classifier: {}", config.backend.classifier_model);
    info!("  VQA: {}", config.backend.vqa_model);
    info!("  Segmentation: {}", config.backend.segmentation_model);
    info!("  Temp dir: {}", config.backend.temp_dir.display());
    info!(
        "  Default pixel spacing: {} mm (activation threshold {})",
        config.pixel_spacing_mm, config.activation_threshold
    );

    let mut settings = config.segmentation_settings();
    if let Some(ref path) = config.label_font {
        match load_font(path) {
            Ok(font) => {
                info!("  Label font: {}", path.display());
                settings.compositor = settings.compositor.with_font(font);
            }
            Err(e) => {
                warn!(
                    "  Label font {} unusable ({}), using bundled font",
                    path.display(),
                    e
                );
            }
        }
    }

    let provider = match RemoteModelProvider::new(config.backend.remote_settings()) {
        Ok(provider) => provider,
        Err(e) => {
            error!("Failed to create inference client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("");
    info!("Connecting to inference backend...");
    match provider.health().await {
        Ok(()) => info!("  Connected successfully"),
        Err(e) => {
            warn!("  Inference backend not reachable: {}", e);
            warn!("  Services will be constructed on first use");
        }
    }

    let orchestrator = Arc::new(AnalysisOrchestrator::new(provider, settings));

    if config.eager_load {
        info!("");
        info!("Loading services...");
        let failures = orchestrator.initialize_all().await;
        for domain in ServiceDomain::ALL {
            match failures.iter().find(|(d, _)| *d == domain) {
                None => info!("  {}: loaded", domain),
                Some((_, e)) => warn!("  {}: {} (will retry on first use)", domain, e),
            }
        }
    }

    let router = create_shared_router(orchestrator, config.router_config());
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/pathologies", addr);
    info!(
        "    curl -X POST http://{}/images -H 'Content-Type: application/json' \\",
        addr
    );
    info!("         -d '{{\"image_path\": \"/data/cxr.png\"}}'");
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!(" ██████╗██╗  ██╗██████╗ ");
    info!("██╔════╝╚██╗██╔╝██╔══██╗");
    info!("██║      ╚███╔╝ ██████╔╝");
    info!("██║      ██╔██╗ ██╔══██╗");
    info!("╚██████╗██╔╝ ██╗██║  ██║");
    info!(" ╚═════╝╚═╝  ╚═╝╚═╝  ╚═╝");
    info!("");
    info!("  chest radiograph analysis  v{}", version);
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "cxr_analysis=debug,tower_http=debug"
    } else {
        "cxr_analysis=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("CXR Analysis Backend Check");
    println!("═════════════════════════════════");
    println!();

    if let Err(e) = config.validate() {
        println!("✗ Configuration: {}", e);
        return ExitCode::FAILURE;
    }
    println!("✓ Backend: {}", config.backend.inference_url);
    if let Some(ref device) = config.backend.device {
        println!("✓ Device: {}", device);
    }
    println!();

    let provider = match RemoteModelProvider::new(config.backend.remote_settings()) {
        Ok(provider) => provider,
        Err(e) => {
            println!("✗ Client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print!("Testing backend health... ");
    match provider.health().await {
        Ok(()) => println!("✓ success"),
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            println!();
            println!("Please check:");
            println!("  - The inference server is running");
            println!(
                "  - '{}' is the correct base URL",
                config.backend.inference_url
            );
            return ExitCode::FAILURE;
        }
    }

    if config.load {
        println!();
        println!("Loading models:");
        println!("─────────────────");

        let mut failed = false;
        let checks = [
            (
                config.backend.classifier_model.as_str(),
                provider.load_classifier().await.map(|c| {
                    format!("{} pathologies", c.supported_pathologies().len())
                }),
            ),
            (
                config.backend.vqa_model.as_str(),
                provider.load_visual_qa().await.map(|_| "ready".to_string()),
            ),
            (
                config.backend.segmentation_model.as_str(),
                provider
                    .load_segmentation()
                    .await
                    .map(|s| format!("{} organs", s.supported_organs().len())),
            ),
            (
                "dicom",
                provider.load_dicom().await.map(|_| "ready".to_string()),
            ),
        ];

        for (model, outcome) in checks {
            match outcome {
                Ok(summary) => println!("  ✓ {} ({})", model, summary),
                Err(e) => {
                    failed = true;
                    println!("  ✗ {}: {}", model, e);
                }
            }
        }

        if failed {
            return ExitCode::FAILURE;
        }
    }

    println!();
    println!("═════════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
