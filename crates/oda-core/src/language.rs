//! Language codes, translation pairs and detection contracts.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::support::Availability;

/// An ordered (source, target) language pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// True when translating would be the identity.
    pub fn is_identity(&self) -> bool {
        normalize_language_code(&self.source) == normalize_language_code(&self.target)
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

/// One candidate language reported by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLanguage {
    /// BCP 47 tag as reported by the detector
    pub language: String,
    /// Confidence in `0.0..=1.0`; detectors may omit it
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl DetectedLanguage {
    pub fn new(language: impl Into<String>, confidence: f32) -> Self {
        Self {
            language: language.into(),
            confidence: Some(confidence),
        }
    }
}

/// Reduces a language tag to its base code.
///
/// Every Chinese variant collapses to `zh`; otherwise the primary subtag is
/// kept and lowercased (`en-US` becomes `en`).
pub fn normalize_language_code(code: &str) -> String {
    let lower = code.trim().to_lowercase();
    if lower.starts_with("zh") {
        return "zh".to_string();
    }
    lower
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A constructed language detector.
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    /// Candidate languages for `text`, most likely first.
    async fn detect(&self, text: &str) -> Result<Vec<DetectedLanguage>>;
}

/// Host seam for language detection: support check plus construction.
#[async_trait]
pub trait DetectorProvider: Send + Sync {
    async fn availability(&self) -> Result<Availability>;

    /// Constructs the detector. `on_progress` receives `(loaded, total)`
    /// download updates.
    async fn create(
        &self,
        on_progress: Box<dyn Fn(u64, u64) + Send + Sync>,
    ) -> Result<std::sync::Arc<dyn LanguageDetector>>;
}
