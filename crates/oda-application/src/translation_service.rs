use futures::future::try_join_all;
use oda_core::config::SessionConfig;
use oda_core::language::LanguagePair;
use oda_core::progress::{ProgressReporter, ProgressSink};
use oda_core::{
    Availability, Capability, CapabilityProvider, OdaError, Resource, Result,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::SingleFlightCache;

/// Translation on top of per-pair translator resources.
///
/// One translator is constructed per ordered language pair and shared by
/// every caller; translated strings are memoized per `(text, pair)`.
pub struct TranslatorService {
    provider: Arc<dyn CapabilityProvider>,
    translators: SingleFlightCache<LanguagePair, Arc<dyn Resource>>,
    memo: Mutex<HashMap<(String, LanguagePair), String>>,
    progress_sinks: Vec<Arc<dyn ProgressSink>>,
}

impl TranslatorService {
    /// Creates a service whose translators come from `provider`.
    pub fn new(provider: Arc<dyn CapabilityProvider>) -> Self {
        if provider.capability() != Capability::Translation {
            tracing::warn!(
                capability = %provider.capability(),
                "TranslatorService backed by a non-translation provider"
            );
        }
        Self {
            provider,
            translators: SingleFlightCache::new(),
            memo: Mutex::new(HashMap::new()),
            progress_sinks: Vec::new(),
        }
    }

    /// Adds a sink for translator download progress.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sinks.push(sink);
        self
    }

    /// Whether the host can translate `pair`. Query failures read as unavailable.
    pub async fn availability(&self, pair: &LanguagePair) -> Availability {
        let config = SessionConfig::for_pair(pair.clone());
        match self.provider.availability(&config).await {
            Ok(availability) => availability,
            Err(e) => {
                tracing::warn!(%pair, error = %e, "Translation availability check failed");
                Availability::Unavailable
            }
        }
    }

    /// True once the translator for `pair` has been constructed.
    pub fn is_ready(&self, pair: &LanguagePair) -> bool {
        self.translators.has(pair)
    }

    /// Returns the translator for `pair`, constructing it on first use.
    ///
    /// Calling this again after a failure is the retry path.
    ///
    /// # Errors
    ///
    /// - `UnsupportedCapability` when the host does not offer `pair`
    /// - the provider's construction error
    pub async fn ensure_translator(&self, pair: &LanguagePair) -> Result<Arc<dyn Resource>> {
        if let Some(translator) = self.translators.get(pair) {
            return Ok(translator);
        }

        let availability = self.availability(pair).await;
        if !availability.is_usable() {
            tracing::warn!(%pair, "Translation pair not supported");
            return Err(OdaError::unsupported(
                Capability::Translation,
                format!("{pair} is not supported"),
            ));
        }

        let provider = self.provider.clone();
        let config = SessionConfig::for_pair(pair.clone());
        let progress = self
            .progress_sinks
            .iter()
            .fold(ProgressReporter::new(), |reporter, sink| {
                reporter.with_sink(sink.clone())
            });

        tracing::info!(%pair, ?availability, "Loading translator");
        self.translators
            .get_or_create(pair.clone(), move || async move {
                provider.create(&config, progress).await
            })
            .await
    }

    /// Translates `text` from `pair.source` to `pair.target`.
    ///
    /// Same-language pairs and blank text are returned unchanged.
    pub async fn translate(&self, text: &str, pair: &LanguagePair) -> Result<String> {
        if pair.is_identity() || text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let memo_key = (text.to_string(), pair.clone());
        if let Some(cached) = self.memo_lookup(&memo_key) {
            return Ok(cached);
        }

        let translator = self.ensure_translator(pair).await?;
        let translated = translator.invoke(&[], text).await.map_err(|e| match e {
            OdaError::GenerationFailed(_) => e,
            other => OdaError::generation_failed(other.to_string()),
        })?;

        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(memo_key, translated.clone());
        Ok(translated)
    }

    /// Translates every entry of `texts`, preserving order.
    ///
    /// # Errors
    ///
    /// The first translation error.
    pub async fn translate_batch<S>(&self, texts: &[S], pair: &LanguagePair) -> Result<Vec<String>>
    where
        S: AsRef<str>,
    {
        try_join_all(texts.iter().map(|text| self.translate(text.as_ref(), pair))).await
    }

    /// Pairs whose translator is constructed.
    pub fn ready_pairs(&self) -> Vec<LanguagePair> {
        self.translators.ready_keys()
    }

    /// Forgets memoized translations; translators stay loaded.
    pub fn clear_memo(&self) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn memo_lookup(&self, key: &(String, LanguagePair)) -> Option<String> {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}
