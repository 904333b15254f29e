//! Error types for ODA.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::Capability;

/// A shared error type for the entire ODA workspace.
///
/// Errors are `Clone` so that one failed construction attempt can be handed
/// to every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OdaError {
    /// The host cannot provide the capability (fatal until re-initialized)
    #[error("{capability} is not available on this host: {reason}")]
    UnsupportedCapability {
        capability: Capability,
        reason: String,
    },

    /// A generation is already in flight for this session
    #[error("A generation is already in progress")]
    BusyGenerating,

    /// The session has no usable resource yet
    #[error("Session is not ready (state: {state})")]
    NotReady { state: String },

    /// The resource failed while producing a response (recoverable)
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Constructing the underlying resource failed
    #[error("Resource construction failed: {0}")]
    ResourceConstruction(String),

    /// A history mutation did not target the expected entry
    #[error("History conflict: {0}")]
    HistoryConflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file system and process operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OdaError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates an UnsupportedCapability error
    pub fn unsupported(capability: Capability, reason: impl Into<String>) -> Self {
        Self::UnsupportedCapability {
            capability,
            reason: reason.into(),
        }
    }

    /// Creates a NotReady error from the current state's display form
    pub fn not_ready(state: impl ToString) -> Self {
        Self::NotReady {
            state: state.to_string(),
        }
    }

    /// Creates a GenerationFailed error
    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::GenerationFailed(message.into())
    }

    /// Creates a ResourceConstruction error
    pub fn construction(message: impl Into<String>) -> Self {
        Self::ResourceConstruction(message.into())
    }

    /// Creates a HistoryConflict error
    pub fn history_conflict(message: impl Into<String>) -> Self {
        Self::HistoryConflict(message.into())
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is an UnsupportedCapability error
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedCapability { .. })
    }

    /// Check if this is a BusyGenerating error
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::BusyGenerating)
    }

    /// Check if this is a NotReady error
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// Check if this is a GenerationFailed error
    pub fn is_generation_failed(&self) -> bool {
        matches!(self, Self::GenerationFailed(_))
    }

    /// Check if this error came from resource construction.
    ///
    /// Unsupported capabilities count as construction failures because they
    /// abort the same initialization path.
    pub fn is_initialization_failure(&self) -> bool {
        matches!(
            self,
            Self::ResourceConstruction(_) | Self::UnsupportedCapability { .. }
        )
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for OdaError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for OdaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for OdaError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for OdaError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Conversion from anyhow::Error for collaborator code that reports through anyhow
impl From<anyhow::Error> for OdaError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, OdaError>`.
pub type Result<T> = std::result::Result<T, OdaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_capability() {
        let err = OdaError::unsupported(Capability::Translation, "pair en-xx not offered");
        assert!(err.is_unsupported());
        assert!(err.is_initialization_failure());
        assert_eq!(
            err.to_string(),
            "translation is not available on this host: pair en-xx not offered"
        );
    }

    #[test]
    fn test_generation_failure_is_not_initialization_failure() {
        let err = OdaError::generation_failed("model crashed");
        assert!(err.is_generation_failed());
        assert!(!err.is_initialization_failure());
    }

    #[test]
    fn test_io_error_conversion_keeps_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "llama-cli");
        let err: OdaError = io.into();
        match err {
            OdaError::Io { message } => assert!(message.contains("NotFound")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
