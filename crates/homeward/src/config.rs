//! Configuration management for the Homeward daemon.
//!
//! This module handles loading and validation of the daemon's TOML
//! configuration, plus discovery of the per-family definition files.

use anyhow::{Context, Result};
use family_router::FamilyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

fn default_families_directory() -> String {
    "families".to_string()
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Family discovery settings
    pub families: FamiliesSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Where per-family definition files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamiliesSettings {
    /// Directory scanned for `*.toml` family definitions
    #[serde(default = "default_families_directory")]
    pub directory: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Optional file path for log output (None means stdout only)
    pub file_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            families: FamiliesSettings {
                directory: default_families_directory(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates settings the loader cannot default away.
    pub fn validate(&self) -> Result<(), String> {
        if self.families.directory.is_empty() {
            return Err("Families directory cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            ));
        }

        Ok(())
    }
}

/// Loads every `*.toml` family definition under the given directory.
///
/// A missing directory is created and seeded with a commented example
/// definition, which is then loaded like any other.
pub async fn load_family_configs(directory: &Path) -> Result<Vec<FamilyConfig>> {
    if !directory.exists() {
        tokio::fs::create_dir_all(directory)
            .await
            .with_context(|| format!("failed to create {}", directory.display()))?;
        write_example_family(directory).await?;
        info!(
            "Created families directory with an example definition: {}",
            directory.display()
        );
    }

    let mut configs = Vec::new();
    let mut entries = tokio::fs::read_dir(directory)
        .await
        .with_context(|| format!("failed to read {}", directory.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: FamilyConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse family definition {}", path.display()))?;
        configs.push(config);
    }

    // deterministic construction order regardless of directory iteration
    configs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(configs)
}

async fn write_example_family(directory: &Path) -> Result<()> {
    let example = FamilyConfig::new("example");
    let body = toml::to_string_pretty(&example)?;
    let content = format!(
        "# Homeward static family definition.\n\
         #\n\
         # Players joining this family keep a durable residence: the server\n\
         # they first join is remembered, and later joins reconnect them to\n\
         # it. `unavailable_protocol` decides what happens when that server\n\
         # has left the family; `storage_protocol` decides when the\n\
         # residence is first recorded.\n\n{body}"
    );
    tokio::fs::write(directory.join("example.toml"), content).await?;
    Ok(())
}
