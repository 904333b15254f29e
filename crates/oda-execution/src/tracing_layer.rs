//! Custom tracing layer for streaming session log events to an observer
//!
//! This module provides a tracing layer that captures events emitted by the
//! oda crates and forwards them to a host (UI, log viewer) via tokio channels.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Default target prefix: every `oda_*` crate.
pub const DEFAULT_TARGET_PREFIX: &str = "oda";

/// Log event data sent to the observer
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEvent {
    /// Event target (e.g., "oda_application::session::controller")
    pub target: String,
    /// Log level (INFO, DEBUG, WARN, ERROR)
    pub level: String,
    /// Human-readable message
    pub message: String,
    /// Structured fields from the event
    pub fields: HashMap<String, Value>,
    /// Fields of the enclosing spans, innermost last
    pub span: HashMap<String, Value>,
    /// Timestamp
    pub timestamp: String,
}

/// Span fields stored in the span's extensions
struct SpanFields(HashMap<String, Value>);

/// A tracing layer that sends matching events to a channel
pub struct SessionEventLayer {
    sender: mpsc::UnboundedSender<LogEvent>,
    target_prefix: String,
}

impl SessionEventLayer {
    /// Create a new layer forwarding events whose target starts with `oda`
    pub fn new(sender: mpsc::UnboundedSender<LogEvent>) -> Self {
        Self {
            sender,
            target_prefix: DEFAULT_TARGET_PREFIX.to_string(),
        }
    }

    /// Create a layer together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    /// Only forward events whose target starts with `prefix`
    pub fn with_target_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.target_prefix = prefix.into();
        self
    }

    fn wants(&self, target: &str) -> bool {
        target.starts_with(&self.target_prefix)
    }
}

impl<S> Layer<S> for SessionEventLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !self.wants(attrs.metadata().target()) {
            return;
        }
        let mut fields = HashMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(fields));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            if let Some(SpanFields(fields)) = extensions.get_mut::<SpanFields>() {
                values.record(&mut FieldVisitor(fields));
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.wants(metadata.target()) {
            return;
        }

        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));

        // Merge the fields of every enclosing span, outermost first
        let mut span_fields = HashMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(SpanFields(stored)) = span.extensions().get::<SpanFields>() {
                    span_fields.extend(stored.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }

        let message = fields
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let log_event = LogEvent {
            target: metadata.target().to_string(),
            level: metadata.level().to_string(),
            message,
            fields,
            span: span_fields,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        // Non-blocking send - if the receiver is dropped, we just skip
        let _ = self.sender.send(log_event);
    }
}

/// Field visitor that extracts tracing fields into a HashMap
struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(
            field.name().to_string(),
            serde_json::json!(format!("{:?}", value)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_forwards_only_matching_targets() {
        let (layer, mut receiver) = SessionEventLayer::channel();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "oda_application::cache", key = "en-fr", attempt = 3u64, "Starting construction");
            tracing::info!(target: "hyper::client", "unrelated");
        });

        let event = receiver.try_recv().expect("Should forward oda event");
        assert_eq!(event.target, "oda_application::cache");
        assert_eq!(event.level, "INFO");
        assert_eq!(event.message, "Starting construction");
        assert_eq!(event.fields["key"], "en-fr");
        assert_eq!(event.fields["attempt"], 3);
        assert!(receiver.try_recv().is_err(), "Unrelated target should be skipped");
    }

    #[test]
    fn test_span_fields_are_attached() {
        let (layer, mut receiver) = SessionEventLayer::channel();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!(target: "oda_application", "session", capability = "chat");
            let _guard = span.enter();
            tracing::warn!(target: "oda_application", error = "boom", "Generation failed");
        });

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.level, "WARN");
        assert_eq!(event.span["capability"], "chat");
        assert_eq!(event.fields["error"], "boom");
    }

    #[test]
    fn test_custom_prefix() {
        let (layer, mut receiver) = SessionEventLayer::channel();
        let subscriber = tracing_subscriber::registry().with(layer.with_target_prefix("oda_interaction"));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: "oda_application::cache", "skipped");
            tracing::debug!(target: "oda_interaction::local_agents", "kept");
        });

        assert_eq!(receiver.try_recv().unwrap().message, "kept");
        assert!(receiver.try_recv().is_err());
    }
}
