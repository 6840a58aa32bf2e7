//! TOML Configuration Management
//!
//! Loads `config.toml`, falling back to built-in defaults when the file is
//! absent, and validates the result before any work starts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::models::settings::{ConfigOverrides, DeepReaderConfig};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, deep_reader_dir};

/// Configuration service for the reader settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: DeepReaderConfig,
}

impl ConfigService {
    /// Load from `path`, or from `~/.deep-reader/config.toml` when `None`.
    /// A missing file yields the defaults; it is not created.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            if path.is_some() {
                return Err(AppError::config(format!(
                    "config file not found: {}",
                    config_path.display()
                )));
            }
            debug!(path = %config_path.display(), "No config file, using defaults");
            DeepReaderConfig::default()
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<DeepReaderConfig> {
        let content = fs::read_to_string(path)?;
        let config: DeepReaderConfig = toml::from_str(&content)?;
        config.validate().map_err(AppError::config)?;
        info!(path = %path.display(), mode = %config.mode, "Loaded configuration");
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    fn save_to_file(path: &Path, config: &DeepReaderConfig) -> AppResult<()> {
        config.validate().map_err(AppError::config)?;
        let content = toml::to_string_pretty(config)
            .map_err(|e| AppError::config(format!("failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply command-line overrides and re-validate.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> AppResult<()> {
        self.config.apply_overrides(overrides);
        self.config.validate().map_err(AppError::config)
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &DeepReaderConfig {
        &self.config
    }

    pub fn into_config(self) -> DeepReaderConfig {
        self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write the current configuration to its path.
    pub fn save(&self) -> AppResult<()> {
        Self::save_to_file(&self.config_path, &self.config)
    }

    /// Data directory: the configured one or `~/.deep-reader`.
    pub fn data_dir(&self) -> AppResult<PathBuf> {
        match &self.config.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => deep_reader_dir(),
        }
    }
}
