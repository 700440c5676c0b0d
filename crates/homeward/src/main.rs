//! Main application entry point for the Homeward routing daemon
//!
//! Provides CLI interface, configuration loading, and startup of the
//! family registry with the default in-memory residence store.

use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use family_router::{
    AllowAll, Family, FamilyRegistry, MemoryResidenceStore, StoreRegistry, UnwiredConnector,
};

mod config;

use config::{load_family_configs, AppConfig, LoggingSettings};

// ============================================================================
// CLI Interface
// ============================================================================

/// Command line arguments
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub families_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl CliArgs {
    /// Parse command line arguments
    pub fn parse() -> Self {
        let matches = Command::new("Homeward")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Session-sticky connection routing for game-server fleets")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("homeward.toml"),
            )
            .arg(
                Arg::new("families")
                    .short('f')
                    .long("families")
                    .value_name("DIR")
                    .help("Directory containing family definitions"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("config has a default value"),
            ),
            families_dir: matches.get_one::<String>("families").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

// ============================================================================
// Logging Setup
// ============================================================================

/// Initialize logging system
fn setup_logging(config: &LoggingSettings, json_format: bool) -> Result<()> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file_layer = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    info!("Logging initialized with level: {}", log_level);
    Ok(())
}

// ============================================================================
// Signal Handling
// ============================================================================

/// Setup graceful shutdown signal handling
async fn setup_signal_handlers() -> Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

// ============================================================================
// Application
// ============================================================================

/// Main application struct
pub struct Application {
    config: AppConfig,
    registry: FamilyRegistry,
}

impl Application {
    /// Load configuration, set up logging, and construct every family.
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(families_dir) = args.families_dir {
            config.families.directory = families_dir.to_string_lossy().to_string();
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            anyhow::bail!("Configuration validation failed: {e}");
        }

        setup_logging(&config.logging, args.json_logs)?;

        info!("Homeward v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "Config: {} | Families: {}",
            args.config_path.display(),
            config.families.directory
        );

        // The default store is in-memory; a deployment that needs durable
        // residences registers its database-backed store under "default"
        // (or any name family definitions reference) before construction.
        let stores = Arc::new(StoreRegistry::new());
        stores.register("default", Arc::new(MemoryResidenceStore::new()));

        let registry = FamilyRegistry::new(stores, Arc::new(UnwiredConnector), Arc::new(AllowAll));

        let family_configs =
            load_family_configs(std::path::Path::new(&config.families.directory)).await?;
        if family_configs.is_empty() {
            anyhow::bail!(
                "No family definitions found in {}",
                config.families.directory
            );
        }

        for family_config in &family_configs {
            let family = registry
                .construct(family_config)
                .await
                .with_context(|| format!("failed to construct family '{}'", family_config.id))?;
            info!(
                family = %family.id(),
                display_name = family.display_name().unwrap_or("none"),
                storage_protocol = %family.storage_protocol(),
                unavailable_protocol = %family.unavailable_protocol(),
                expiration_secs = family.residence_expiration().as_secs(),
                "family ready"
            );
        }

        Ok(Self { config, registry })
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        info!(
            "Homeward is running with {} families from {}",
            self.registry.len(),
            self.config.families.directory
        );
        info!("Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers().await?;

        info!("Shutdown signal received");
        info!("Homeward shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Application error: {e:?}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}
