//! # Multiverse Server - Main Entry Point
//!
//! Hosts the multiverse session backend: loads configuration, sets up
//! logging, wires the backend services and runs until a termination signal.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (written to config.toml if missing)
//! multiverse
//!
//! # Point at the seed generator and log verbosely
//! multiverse --seedgen-path /opt/seedgen/seedgen --log-level debug
//!
//! # JSON logging for production
//! multiverse --config production.toml --json-logs
//! ```
//!
//! ## Configuration
//!
//! Settings are read from a TOML file, then `SEEDGEN_PATH` and
//! `SEEDGEN_TIMEOUT` from the environment, then command-line arguments.
//! Startup fails when no seed generator executable is configured.
//!
//! ## Signal Handling
//!
//! SIGINT or SIGTERM persists every live game handler and exits. A second
//! signal exits immediately.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;
use tracing::{error, info};

pub use config::LoggingSettings;

/// Runs the server with the process arguments.
///
/// Exits the process with status 1 on any startup or runtime failure.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = match AppConfig::load_from_file(&args.config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration {}: {e}", args.config_path.display());
            std::process::exit(1);
        }
    };
    config.apply_overrides(&args);

    if let Err(e) = logging::setup_logging(&config.logging) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        error!("❌ Configuration validation failed: {e}");
        std::process::exit(1);
    }
    info!("✅ Configuration loaded from {}", args.config_path.display());

    match Application::new(config) {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}
