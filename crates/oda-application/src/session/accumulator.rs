use futures::{Stream, StreamExt};
use oda_core::Result;
use tokio_util::sync::CancellationToken;

/// How a streamed reply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
}

/// The folded result of one streamed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatedReply {
    pub content: String,
    pub outcome: StreamOutcome,
    /// Number of non-empty increments applied
    pub increments: usize,
}

/// Folds a stream of text increments into one growing reply.
///
/// Increments are applied strictly in arrival order. The cancellation token
/// is checked before every increment and while waiting for the next one;
/// cancelling ends the fold without an error and keeps what has arrived.
pub struct StreamingAccumulator {
    cancel: CancellationToken,
    content: String,
    increments: usize,
}

impl StreamingAccumulator {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            content: String::new(),
            increments: 0,
        }
    }

    /// Drives `stream` to completion or cancellation.
    ///
    /// `on_increment` receives each delta and the content accumulated so
    /// far, after the delta was applied.
    ///
    /// # Errors
    ///
    /// A stream item error or an `on_increment` error ends the fold; the
    /// partial content is dropped and the error returned.
    pub async fn run<S, F>(mut self, mut stream: S, mut on_increment: F) -> Result<AccumulatedReply>
    where
        S: Stream<Item = Result<String>> + Unpin,
        F: FnMut(&str, &str) -> Result<()>,
    {
        let cancel = self.cancel.clone();
        loop {
            if cancel.is_cancelled() {
                return Ok(self.finish(StreamOutcome::Cancelled));
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.finish(StreamOutcome::Cancelled)),
                next = stream.next() => next,
            };

            match next {
                None => return Ok(self.finish(StreamOutcome::Completed)),
                Some(Ok(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    self.content.push_str(&delta);
                    self.increments += 1;
                    on_increment(&delta, &self.content)?;
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        increments = self.increments,
                        error = %e,
                        "Stream failed, discarding partial reply"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn finish(self, outcome: StreamOutcome) -> AccumulatedReply {
        tracing::debug!(increments = self.increments, ?outcome, "Stream finished");
        AccumulatedReply {
            content: self.content,
            outcome,
            increments: self.increments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use oda_core::OdaError;

    fn chunks(items: &[&str]) -> Vec<Result<String>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    #[tokio::test]
    async fn test_increments_fold_in_order() {
        let mut seen = Vec::new();
        let reply = StreamingAccumulator::new(CancellationToken::new())
            .run(stream::iter(chunks(&["The ", "quick ", "", "fox"])), |delta, content| {
                seen.push((delta.to_string(), content.to_string()));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(reply.content, "The quick fox");
        assert_eq!(reply.outcome, StreamOutcome::Completed);
        assert_eq!(reply.increments, 3);
        assert_eq!(seen[1], ("quick ".to_string(), "The quick ".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_before_start_applies_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let reply = StreamingAccumulator::new(cancel)
            .run(stream::iter(chunks(&["a", "b"])), |_, _| Ok(()))
            .await
            .unwrap();
        assert_eq!(reply.outcome, StreamOutcome::Cancelled);
        assert!(reply.content.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_keeps_partial_content() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let source = stream::iter(chunks(&["Hel", "lo"])).chain(stream::pending());

        let reply = StreamingAccumulator::new(cancel)
            .run(source, move |_, content| {
                if content == "Hello" {
                    trigger.cancel();
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(reply.outcome, StreamOutcome::Cancelled);
        assert_eq!(reply.content, "Hello");
    }

    #[tokio::test]
    async fn test_stream_error_is_propagated() {
        let source = stream::iter(vec![
            Ok("partial".to_string()),
            Err(OdaError::generation_failed("device lost")),
            Ok("never".to_string()),
        ]);
        let err = StreamingAccumulator::new(CancellationToken::new())
            .run(source, |_, _| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_generation_failed());
    }

    #[tokio::test]
    async fn test_sink_error_stops_the_fold() {
        let mut calls = 0;
        let err = StreamingAccumulator::new(CancellationToken::new())
            .run(stream::iter(chunks(&["a", "b", "c"])), |_, _| {
                calls += 1;
                Err(OdaError::history_conflict("tail moved"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OdaError::HistoryConflict(_)));
        assert_eq!(calls, 1);
    }
}
