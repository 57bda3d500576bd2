//! Configuration Loader
//!
//! Builds a `ClientConfig` from defaults, an optional JSON file and
//! environment overrides.

use crate::config::settings::ClientConfig;
use crate::error::{DeepSeekError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    config: ClientConfig,
}

impl ConfigLoader {
    /// Load defaults, the first config file found, then the environment
    pub fn new() -> Result<Self> {
        let mut loader = Self {
            config: ClientConfig::default(),
        };

        if let Some(path) = Self::get_config_paths().into_iter().find(|p| p.exists()) {
            loader.load_from_file(&path)?;
        }

        loader.apply_env_overrides(|name| std::env::var(name).ok());
        loader.config.validate()?;
        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self {
            config: ClientConfig::default(),
        };

        loader.load_from_file(path)?;
        loader.apply_env_overrides(|name| std::env::var(name).ok());
        loader.config.validate()?;
        Ok(loader)
    }

    /// Get list of config paths to check, in priority order
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment variable
        if let Ok(custom_path) = std::env::var("DEEPSEEK_CONFIG_PATH") {
            paths.push(PathBuf::from(custom_path));
        }

        // 2. Current directory
        paths.push(PathBuf::from("deepseek.json"));

        // 3. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("deepseek").join("config.json"));
        }

        paths
    }

    /// Load configuration from a specific file, replacing current settings
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeepSeekError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        self.config = serde_json::from_str(&content).map_err(|e| {
            DeepSeekError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "loaded client config");
        Ok(())
    }

    /// `DEEPSEEK_BASE_URL` and `DEEPSEEK_MODEL` override file settings
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DEEPSEEK_BASE_URL").filter(|v| !v.is_empty()) {
            self.config.base_url = url;
        }
        if let Some(model) = lookup("DEEPSEEK_MODEL").filter(|v| !v.is_empty()) {
            self.config.model = model;
        }
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> ClientConfig {
        self.config
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            config: ClientConfig::default(),
        })
    }
}
