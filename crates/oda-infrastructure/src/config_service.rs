//! Configuration service implementation.
//!
//! This module provides a ConfigService that loads the root configuration
//! from the configuration file (~/.config/oda/config.toml).

use crate::paths::OdaPaths;
use oda_core::config::RootConfig;
use oda_core::{OdaError, Result};
use std::fs::{self, File};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Configuration service that loads and caches the root configuration.
///
/// The file is read lazily on first access and cached until
/// [`invalidate_cache`](Self::invalidate_cache) or a save.
#[derive(Debug, Clone)]
pub struct ConfigService {
    /// Explicit file location; `None` resolves through [`OdaPaths`]
    path: Option<PathBuf>,
    /// Cached configuration loaded from file.
    config: Arc<RwLock<Option<RootConfig>>>,
}

impl ConfigService {
    /// Creates a service reading the default config file.
    pub fn new() -> Self {
        Self {
            path: None,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Creates a service reading `path` instead of the default location.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the root configuration, loading from file if not cached.
    ///
    /// A missing or empty file yields the defaults.
    ///
    /// # Errors
    ///
    /// - `Serialization` when the file is not valid TOML for [`RootConfig`]
    /// - `Io` when the file exists but cannot be read
    pub fn get_config(&self) -> Result<RootConfig> {
        if let Some(cached) = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(cached.clone());
        }

        let path = self.config_path()?;
        let loaded = Self::load_config(&path)?;

        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(loaded.clone());
        Ok(loaded)
    }

    /// Writes `config` to the config file and replaces the cached copy.
    ///
    /// The file is written to a temporary sibling first and renamed into
    /// place.
    pub fn save_config(&self, config: &RootConfig) -> Result<()> {
        let path = self.config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        let tmp_path = temp_path(&path)?;
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(content.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);
        fs::rename(&tmp_path, &path)?;

        tracing::info!(path = %path.display(), "Configuration saved");
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(())
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The file this service reads.
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => OdaPaths::config_file().map_err(|e| OdaError::config(e.to_string())),
        }
    }

    fn load_config(path: &Path) -> Result<RootConfig> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(RootConfig::default());
        }

        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(RootConfig::default());
        }

        let config: RootConfig = toml::from_str(&content).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Invalid config file");
            OdaError::from(e)
        })?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| OdaError::config("config path has no parent directory"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| OdaError::config("config path has no file name"))?;
    Ok(parent.join(format!(".{}.tmp", file_name.to_string_lossy())))
}
