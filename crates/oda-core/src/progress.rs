//! Loading progress reporting.
//!
//! Providers push raw `(fraction, text)` updates into a [`ProgressReporter`];
//! the reporter keeps them monotonic and fans them out to the registered
//! [`ProgressSink`]s.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// A single progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Completion in `0.0..=1.0`
    pub fraction: f64,
    pub label: String,
}

impl Progress {
    /// Formats a model-loading label, e.g. `Loading model: weights (42.0%)`.
    pub fn loading(text: &str, fraction: f64) -> Self {
        let fraction = clamp_fraction(fraction);
        Self {
            fraction,
            label: format!("Loading model: {} ({:.1}%)", text, fraction * 100.0),
        }
    }
}

/// Receives progress updates (UI bar, channel, log).
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn report(&self, progress: &Progress) {
        self(progress)
    }
}

/// Cloneable handle given to resource factories.
///
/// Fractions are clamped into `0..=1` and never go backwards: an update below
/// the current high-water mark keeps the previous fraction but still carries
/// its new label.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    latest: Arc<Mutex<Option<Progress>>>,
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Records a loading update using the standard label format.
    pub fn report(&self, fraction: f64, text: &str) {
        self.publish(Progress::loading(text, fraction));
    }

    /// Records an update with a caller-supplied label.
    pub fn publish(&self, progress: Progress) {
        let progress = {
            let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            let floor = latest.as_ref().map_or(0.0, |p| p.fraction);
            let progress = Progress {
                fraction: clamp_fraction(progress.fraction).max(floor),
                label: progress.label,
            };
            *latest = Some(progress.clone());
            progress
        };

        for sink in &self.sinks {
            sink.report(&progress);
        }
    }

    /// The most recent update, if any.
    pub fn latest(&self) -> Option<Progress> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_label_format() {
        let progress = Progress::loading("params_shard_3", 0.4213);
        assert_eq!(progress.label, "Loading model: params_shard_3 (42.1%)");
    }

    #[test]
    fn test_reporter_is_monotonic_and_clamped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let reporter = ProgressReporter::new().with_sink(Arc::new(move |p: &Progress| {
            sink_seen.lock().unwrap().push(p.fraction);
        }));

        reporter.report(0.5, "a");
        reporter.report(0.2, "b");
        reporter.report(7.0, "c");

        assert_eq!(*seen.lock().unwrap(), vec![0.5, 0.5, 1.0]);
        let latest = reporter.latest().unwrap();
        assert_eq!(latest.fraction, 1.0);
        assert!(latest.label.contains('c'));
    }

    #[test]
    fn test_clones_share_state() {
        let reporter = ProgressReporter::new();
        let clone = reporter.clone();
        clone.report(0.3, "x");
        assert_eq!(reporter.latest().map(|p| p.fraction), Some(0.3));
        reporter.reset();
        assert!(clone.latest().is_none());
    }
}
