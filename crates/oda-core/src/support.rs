//! Capability support detection.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityProvider;
use crate::config::SessionConfig;

/// The host's answer to "can you do this?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Unavailable,
    /// Supported once the model or pipeline has been downloaded
    Downloadable,
    Available,
}

impl Availability {
    pub fn is_usable(self) -> bool {
        !matches!(self, Availability::Unavailable)
    }
}

/// Resolved support for one capability.
///
/// `Detecting` only ever moves to `Available` or `Unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportState {
    Detecting,
    Available,
    Unavailable,
}

impl From<Availability> for SupportState {
    fn from(availability: Availability) -> Self {
        if availability.is_usable() {
            SupportState::Available
        } else {
            SupportState::Unavailable
        }
    }
}

impl fmt::Display for SupportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupportState::Detecting => "detecting",
            SupportState::Available => "available",
            SupportState::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Idempotent support check in front of a [`CapabilityProvider`].
///
/// The first resolved answer is kept until [`SupportProbe::recheck`] is
/// called. Provider errors never escape: they resolve to `Unavailable`.
pub struct SupportProbe {
    provider: Arc<dyn CapabilityProvider>,
    resolved: Mutex<Option<Availability>>,
}

impl SupportProbe {
    pub fn new(provider: Arc<dyn CapabilityProvider>) -> Self {
        Self {
            provider,
            resolved: Mutex::new(None),
        }
    }

    /// Current state without touching the host.
    pub fn state(&self) -> SupportState {
        self.availability()
            .map(SupportState::from)
            .unwrap_or(SupportState::Detecting)
    }

    /// The raw availability, once resolved.
    pub fn availability(&self) -> Option<Availability> {
        *self.resolved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached state, querying the host on first use.
    pub async fn check(&self, config: &SessionConfig) -> SupportState {
        if let Some(availability) = self.availability() {
            return availability.into();
        }
        self.recheck(config).await
    }

    /// Queries the host again, replacing any cached answer.
    pub async fn recheck(&self, config: &SessionConfig) -> SupportState {
        let capability = self.provider.capability();
        let availability = match self.provider.availability(config).await {
            Ok(availability) => availability,
            Err(e) => {
                tracing::warn!(%capability, error = %e, "Support check failed, treating as unavailable");
                Availability::Unavailable
            }
        };
        tracing::debug!(%capability, ?availability, "Support resolved");

        *self.resolved.lock().unwrap_or_else(PoisonError::into_inner) = Some(availability);
        availability.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, Resource};
    use crate::error::{OdaError, Result};
    use crate::progress::ProgressReporter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        answer: Result<Availability>,
        queries: AtomicUsize,
    }

    impl MockProvider {
        fn new(answer: Result<Availability>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                queries: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CapabilityProvider for MockProvider {
        fn capability(&self) -> Capability {
            Capability::LanguageDetection
        }

        async fn availability(&self, _config: &SessionConfig) -> Result<Availability> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }

        async fn create(
            &self,
            _config: &SessionConfig,
            _progress: ProgressReporter,
        ) -> Result<Arc<dyn Resource>> {
            Err(OdaError::internal("not used"))
        }
    }

    #[tokio::test]
    async fn test_downloadable_counts_as_available() {
        let probe = SupportProbe::new(MockProvider::new(Ok(Availability::Downloadable)));
        assert_eq!(probe.state(), SupportState::Detecting);
        assert_eq!(
            probe.check(&SessionConfig::default()).await,
            SupportState::Available
        );
        assert_eq!(probe.availability(), Some(Availability::Downloadable));
    }

    #[tokio::test]
    async fn test_provider_error_maps_to_unavailable() {
        let probe = SupportProbe::new(MockProvider::new(Err(OdaError::internal("boom"))));
        assert_eq!(
            probe.check(&SessionConfig::default()).await,
            SupportState::Unavailable
        );
    }

    #[tokio::test]
    async fn test_check_is_cached_until_recheck() {
        let provider = MockProvider::new(Ok(Availability::Available));
        let probe = SupportProbe::new(provider.clone());
        let config = SessionConfig::default();

        probe.check(&config).await;
        probe.check(&config).await;
        assert_eq!(provider.queries.load(Ordering::SeqCst), 1);

        probe.recheck(&config).await;
        assert_eq!(provider.queries.load(Ordering::SeqCst), 2);
    }
}
