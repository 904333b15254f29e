//! Capability provider and resource contracts.
//!
//! A [`CapabilityProvider`] is the injected stand-in for whatever the host
//! offers (a local model runner, a translation pipeline). It answers the
//! support question and constructs [`Resource`]s; the orchestration layer
//! never talks to the host directly.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::language::LanguagePair;
use crate::progress::ProgressReporter;
use crate::session::Message;
use crate::support::Availability;

/// The on-device capabilities the orchestration layer knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Translation,
    LanguageDetection,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Chat => "chat",
            Capability::Translation => "translation",
            Capability::LanguageDetection => "language detection",
        };
        f.write_str(name)
    }
}

/// Identifies one constructed resource instance.
///
/// Keys compare by full structural equality: `en -> fr` and `fr -> en` are
/// different keys, as are the same model under two capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKey {
    /// A model loaded for a capability
    Model {
        capability: Capability,
        model: String,
    },
    /// A translation pipeline for one ordered language pair
    LanguagePair(LanguagePair),
    /// The single instance a capability needs (e.g. the language detector)
    Singleton(Capability),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Model { capability, model } => write!(f, "{capability}:{model}"),
            ResourceKey::LanguagePair(pair) => write!(f, "translation:{pair}"),
            ResourceKey::Singleton(capability) => write!(f, "{capability}"),
        }
    }
}

/// An ordered stream of text increments produced by one invocation.
pub type TextStream = BoxStream<'static, Result<String>>;

/// A constructed, ready-to-use resource (loaded model, translation pipeline).
#[async_trait]
pub trait Resource: Send + Sync {
    /// Produces one complete response for `input` given the prior `history`.
    async fn invoke(&self, history: &[Message], input: &str) -> Result<String>;

    /// Produces the response as a stream of increments.
    ///
    /// Implementations should stop producing once `cancel` fires. The default
    /// falls back to [`Resource::invoke`] and yields the whole response as a
    /// single increment.
    async fn invoke_streaming(
        &self,
        history: &[Message],
        input: &str,
        cancel: CancellationToken,
    ) -> Result<TextStream> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(stream::empty().boxed()),
            response = self.invoke(history, input) => response?,
        };
        Ok(stream::once(async move { Ok(response) }).boxed())
    }
}

/// Host-facing seam: support check plus resource construction.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Which capability this provider backs.
    fn capability(&self) -> Capability;

    /// Queries the host for support of `config` (model, language pair).
    async fn availability(&self, config: &SessionConfig) -> Result<Availability>;

    /// Constructs the resource, reporting loading progress along the way.
    async fn create(
        &self,
        config: &SessionConfig,
        progress: ProgressReporter,
    ) -> Result<Arc<dyn Resource>>;

    /// Cache key under which the resource for `config` may be shared.
    fn resource_key(&self, config: &SessionConfig) -> ResourceKey {
        if let Some(pair) = &config.languages {
            return ResourceKey::LanguagePair(pair.clone());
        }
        match &config.model {
            Some(model) => ResourceKey::Model {
                capability: self.capability(),
                model: model.clone(),
            },
            None => ResourceKey::Singleton(self.capability()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Resource for Echo {
        async fn invoke(&self, history: &[Message], input: &str) -> Result<String> {
            Ok(format!("{}:{}", history.len(), input))
        }
    }

    #[test]
    fn test_language_pair_keys_are_order_sensitive() {
        let en_fr = ResourceKey::LanguagePair(LanguagePair::new("en", "fr"));
        let fr_en = ResourceKey::LanguagePair(LanguagePair::new("fr", "en"));
        assert_ne!(en_fr, fr_en);
        assert_eq!(en_fr, ResourceKey::LanguagePair(LanguagePair::new("en", "fr")));
        assert_eq!(en_fr.to_string(), "translation:en-fr");
    }

    #[tokio::test]
    async fn test_default_streaming_yields_single_increment() {
        let chunks: Vec<String> = Echo
            .invoke_streaming(&[], "hi", CancellationToken::new())
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["0:hi".to_string()]);
    }

    #[tokio::test]
    async fn test_default_streaming_respects_prior_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chunks: Vec<_> = Echo
            .invoke_streaming(&[], "hi", cancel)
            .await
            .unwrap()
            .collect()
            .await;
        assert!(chunks.is_empty());
    }
}
