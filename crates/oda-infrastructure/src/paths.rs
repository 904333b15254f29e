//! Path management for oda configuration and model files.
//!
//! All paths are derived from the platform directories reported by `dirs`,
//! so the layout is consistent across Linux, macOS and Windows.

use std::path::PathBuf;

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// The platform reported no config directory.
    ConfigDirNotFound,
    /// The platform reported no data directory.
    DataDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::ConfigDirNotFound => write!(f, "Cannot find config directory"),
            PathError::DataDirNotFound => write!(f, "Cannot find data directory"),
        }
    }
}

impl std::error::Error for PathError {}

const APP_DIR: &str = "oda";

/// Path management for oda.
///
/// # Directory Structure
///
/// ```text
/// ~/.config/oda/               # Config directory
/// └── config.toml              # Application configuration
///
/// ~/.local/share/oda/          # Data directory
/// └── models/                  # Downloaded model files
/// ```
pub struct OdaPaths;

impl OdaPaths {
    /// Returns the oda configuration directory (e.g. `~/.config/oda/`).
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::ConfigDirNotFound)
    }

    /// Returns the oda data directory (e.g. `~/.local/share/oda/`).
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::DataDirNotFound)
    }

    /// Returns the path to the main configuration file.
    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Default location of downloaded model files.
    pub fn models_dir() -> Result<PathBuf, PathError> {
        Ok(Self::data_dir()?.join("models"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file() {
        let config_file = OdaPaths::config_file().unwrap();
        assert!(config_file.ends_with("oda/config.toml"));
        let config_dir = OdaPaths::config_dir().unwrap();
        assert!(config_file.starts_with(&config_dir));
    }

    #[test]
    fn test_models_dir() {
        let models_dir = OdaPaths::models_dir().unwrap();
        assert!(models_dir.ends_with("models"));
        assert!(models_dir.starts_with(OdaPaths::data_dir().unwrap()));
    }
}
