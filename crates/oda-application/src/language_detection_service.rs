use oda_core::config::DetectionConfig;
use oda_core::language::{
    DetectedLanguage, DetectorProvider, LanguageDetector, normalize_language_code,
};
use oda_core::{Availability, Capability, OdaError, Result, SupportState};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::SingleFlightCache;

/// Language detection with a lazily constructed, shared detector.
///
/// Results below the configured confidence threshold are discarded. Failures
/// never reach callers of [`detect`](Self::detect): they yield no candidates,
/// and [`detect_primary`](Self::detect_primary) falls back to the configured
/// language.
pub struct LanguageDetectionService {
    provider: Arc<dyn DetectorProvider>,
    config: DetectionConfig,
    detector: SingleFlightCache<Capability, Arc<dyn LanguageDetector>>,
    support: Mutex<Option<Availability>>,
}

impl LanguageDetectionService {
    pub fn new(provider: Arc<dyn DetectorProvider>, config: DetectionConfig) -> Self {
        Self {
            provider,
            config,
            detector: SingleFlightCache::new(),
            support: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Current support state without touching the host.
    pub fn support(&self) -> SupportState {
        self.cached_support()
            .map(SupportState::from)
            .unwrap_or(SupportState::Detecting)
    }

    /// Resolves support once; later calls return the cached answer.
    pub async fn check_support(&self) -> SupportState {
        if let Some(availability) = self.cached_support() {
            return availability.into();
        }

        let availability = match self.provider.availability().await {
            Ok(availability) => availability,
            Err(e) => {
                tracing::warn!(error = %e, "Language detection support check failed");
                Availability::Unavailable
            }
        };
        *self.support.lock().unwrap_or_else(PoisonError::into_inner) = Some(availability);
        availability.into()
    }

    /// True once the detector is constructed.
    pub fn is_ready(&self) -> bool {
        self.detector.has(&Capability::LanguageDetection)
    }

    /// Constructs the detector if needed. Concurrent callers share one
    /// construction; a failed attempt is retried by the next call.
    ///
    /// # Errors
    ///
    /// - `UnsupportedCapability` when the host has no detector
    /// - the provider's construction error
    pub async fn initialize(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        if self.check_support().await != SupportState::Available {
            return Err(OdaError::unsupported(
                Capability::LanguageDetection,
                "language detector is not offered by the host",
            ));
        }

        let provider = self.provider.clone();
        self.detector
            .get_or_create(Capability::LanguageDetection, move || async move {
                let on_progress = Box::new(|loaded: u64, total: u64| {
                    tracing::debug!(loaded, total, "Language detector download progress");
                });
                provider.create(on_progress).await
            })
            .await
            .map(|_| ())
    }

    /// Candidate languages for `text` above the confidence threshold, most
    /// likely first. Empty when detection is unavailable or fails.
    pub async fn detect(&self, text: &str) -> Vec<DetectedLanguage> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self.try_detect(text).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Language detection failed");
                Vec::new()
            }
        }
    }

    /// The most likely language of `text` as a base code, or the fallback.
    pub async fn detect_primary(&self, text: &str) -> String {
        self.detect(text)
            .await
            .first()
            .map(|candidate| normalize_language_code(&candidate.language))
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| self.config.fallback_language.clone())
    }

    /// The first usable locale in `locales`, reduced to a base code.
    pub fn preferred_language<S: AsRef<str>>(&self, locales: &[S]) -> String {
        locales
            .iter()
            .map(|locale| normalize_language_code(locale.as_ref()))
            .find(|code| !code.is_empty())
            .unwrap_or_else(|| self.config.fallback_language.clone())
    }

    async fn try_detect(&self, text: &str) -> Result<Vec<DetectedLanguage>> {
        self.initialize().await?;
        let detector = self
            .detector
            .get(&Capability::LanguageDetection)
            .ok_or_else(|| OdaError::not_ready("language detector evicted"))?;

        let threshold = self.config.confidence_threshold;
        let candidates = detector.detect(text).await?;
        Ok(candidates
            .into_iter()
            .filter(|c| c.confidence.is_some_and(|confidence| confidence > threshold))
            .collect())
    }

    fn cached_support(&self) -> Option<Availability> {
        *self.support.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
