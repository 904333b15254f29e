use futures::future::{BoxFuture, FutureExt, Shared};
use oda_core::config::SessionConfig;
use oda_core::progress::{Progress, ProgressReporter, ProgressSink};
use oda_core::session::{
    ConversationLog, Message, MessageId, MessageStatus, SessionEvent, SessionState,
};
use oda_core::{
    Capability, CapabilityProvider, OdaError, Resource, ResourceKey, Result, SupportProbe,
    SupportState,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::accumulator::{StreamOutcome, StreamingAccumulator};
use crate::cache::SingleFlightCache;

/// Resource cache shared by controllers that may reuse one constructed resource.
pub type ResourceCache = SingleFlightCache<ResourceKey, Arc<dyn Resource>>;

const EVENT_CAPACITY: usize = 256;

/// Result of a `send`/`send_streaming` call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Input was empty or whitespace; nothing happened.
    Ignored,
    /// The assistant reply was appended.
    Completed(Message),
    /// Generation was cancelled; the reply is kept and marked cancelled.
    Cancelled(Message),
}

impl SendOutcome {
    /// The appended assistant message, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            SendOutcome::Ignored => None,
            SendOutcome::Completed(message) | SendOutcome::Cancelled(message) => Some(message),
        }
    }
}

type InitAttempt = Shared<BoxFuture<'static, Result<()>>>;

struct Inner {
    state: SessionState,
    log: ConversationLog,
    config: SessionConfig,
    resource: Option<Arc<dyn Resource>>,
    /// In-flight initialize attempt, joined by concurrent callers
    init: Option<(u64, InitAttempt)>,
    /// Cancellation signal of the in-flight generation
    generation: Option<CancellationToken>,
    last_error: Option<OdaError>,
}

/// State and observer channel shared with in-flight operations.
struct ControllerShared {
    capability: Capability,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl ControllerShared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, inner: &mut Inner, to: SessionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        tracing::debug!(capability = %self.capability, %from, %to, "Session state changed");
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn record_error(&self, inner: &mut Inner, error: OdaError) {
        inner.last_error = Some(error.clone());
        self.emit(SessionEvent::Error { error });
    }

    fn append(&self, inner: &mut Inner, message: Message) -> Result<Message> {
        let message = inner.log.append(message)?.clone();
        self.emit(SessionEvent::MessageAppended {
            message: message.clone(),
        });
        Ok(message)
    }

    fn rollback(&self, inner: &mut Inner, id: MessageId) {
        match inner.log.remove_last(id) {
            Ok(_) => self.emit(SessionEvent::MessageRemoved { id }),
            Err(e) => {
                tracing::error!(capability = %self.capability, message_id = %id, error = %e, "Rollback refused");
            }
        }
    }
}

/// Owns the lifecycle of one capability session.
///
/// `SessionController` is responsible for:
/// - Probing support and constructing the resource (single-flight)
/// - Running at most one generation at a time, atomic or streamed
/// - Keeping the conversation history consistent across failures
/// - Cooperative cancellation of the in-flight generation
///
/// All operational failures are returned *and* kept in [`last_error`];
/// nothing panics or escapes as an unobserved error.
///
/// [`last_error`]: SessionController::last_error
pub struct SessionController {
    shared: Arc<ControllerShared>,
    provider: Arc<dyn CapabilityProvider>,
    probe: Arc<SupportProbe>,
    cache: Option<Arc<ResourceCache>>,
    progress: ProgressReporter,
    next_attempt: AtomicU64,
}

impl SessionController {
    /// Creates an uninitialized controller backed by `provider`.
    pub fn new(provider: Arc<dyn CapabilityProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(ControllerShared {
            capability: provider.capability(),
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                log: ConversationLog::new(),
                config: SessionConfig::default(),
                resource: None,
                init: None,
                generation: None,
                last_error: None,
            }),
            events: events.clone(),
        });

        let progress = ProgressReporter::new().with_sink(Arc::new(move |p: &Progress| {
            let _ = events.send(SessionEvent::Progress(p.clone()));
        }));

        Self {
            shared,
            probe: Arc::new(SupportProbe::new(provider.clone())),
            provider,
            cache: None,
            progress,
            next_attempt: AtomicU64::new(0),
        }
    }

    /// Shares constructed resources with other controllers through `cache`.
    pub fn with_cache(mut self, cache: Arc<ResourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Adds a progress sink fed during initialization.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = self.progress.with_sink(sink);
        self
    }

    /// Sets the configuration used when `initialize` is called without one.
    pub fn with_config(self, config: SessionConfig) -> Self {
        self.shared.lock().config = config;
        self
    }

    // ============================================================================
    // Read access
    // ============================================================================

    pub fn capability(&self) -> Capability {
        self.shared.capability
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// History in conversation order, including a growing streamed reply.
    pub fn snapshot(&self) -> Vec<Message> {
        self.shared.lock().log.snapshot()
    }

    pub fn last_error(&self) -> Option<OdaError> {
        self.shared.lock().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.shared.lock().last_error = None;
    }

    pub fn config(&self) -> SessionConfig {
        self.shared.lock().config.clone()
    }

    /// Latest loading progress of the current or last initialization.
    pub fn progress(&self) -> Option<Progress> {
        self.progress.latest()
    }

    /// Resolved support, or `Detecting` before the first check.
    pub fn support(&self) -> SupportState {
        self.probe.state()
    }

    /// Queries the host again; the result gates the next `initialize`.
    pub async fn recheck_support(&self) -> SupportState {
        let config = self.config();
        self.probe.recheck(&config).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Initializes the session, returning `true` once it is usable.
    ///
    /// On failure the error is readable through [`last_error`](Self::last_error).
    pub async fn initialize(&self, config: Option<SessionConfig>) -> bool {
        self.try_initialize(config).await.is_ok()
    }

    /// Initializes the session, surfacing the failure.
    ///
    /// Already initialized sessions return immediately. While an attempt is
    /// in flight every caller joins it (a `config` passed by a joining caller
    /// is ignored).
    ///
    /// # Errors
    ///
    /// - `UnsupportedCapability` when the host reports no support
    /// - the provider's construction error
    ///
    /// Both leave the session `Errored`; calling again retries.
    pub async fn try_initialize(&self, config: Option<SessionConfig>) -> Result<()> {
        let attempt = {
            let mut inner = self.shared.lock();
            if inner.resource.is_some()
                && matches!(inner.state, SessionState::Ready | SessionState::Generating)
            {
                return Ok(());
            }

            let joined = inner.init.as_ref().map(|(_, attempt)| attempt.clone());
            match joined {
                Some(attempt) => attempt,
                None => {
                    if let Some(config) = config {
                        inner.config = config;
                    }
                    let id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let attempt = self.start_initialize(id, inner.config.clone());
                    inner.init = Some((id, attempt.clone()));
                    inner.last_error = None;
                    self.shared.transition(&mut inner, SessionState::Initializing);
                    attempt
                }
            }
        };

        attempt.await
    }

    fn start_initialize(&self, id: u64, config: SessionConfig) -> InitAttempt {
        let shared = self.shared.clone();
        let provider = self.provider.clone();
        let probe = self.probe.clone();
        let cache = self.cache.clone();
        let progress = self.progress.clone();

        async move {
            let capability = shared.capability;
            tracing::info!(%capability, model = ?config.model, "Initializing session");
            let constructed = construct(&provider, &probe, cache.as_deref(), &progress, &config).await;

            let mut inner = shared.lock();
            if !matches!(&inner.init, Some((current, _)) if *current == id) {
                tracing::debug!(%capability, attempt = id, "Initialization superseded");
                let err = OdaError::not_ready(inner.state);
                shared.record_error(&mut inner, err.clone());
                return Err(err);
            }
            inner.init = None;

            match constructed {
                Ok(resource) => {
                    inner.resource = Some(resource);
                    shared.transition(&mut inner, SessionState::Ready);
                    tracing::info!(%capability, "Session ready");
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(%capability, error = %e, "Session initialization failed");
                    inner.resource = None;
                    shared.record_error(&mut inner, e.clone());
                    shared.transition(&mut inner, SessionState::Errored);
                    Err(e)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Drops the resource and returns to `Uninitialized`. History is kept.
    ///
    /// # Errors
    ///
    /// `BusyGenerating` while a generation is in flight.
    pub fn destroy(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        if inner.state.is_generating() {
            self.shared.record_error(&mut inner, OdaError::BusyGenerating);
            return Err(OdaError::BusyGenerating);
        }
        inner.resource = None;
        inner.init = None;
        self.progress.reset();
        self.shared.transition(&mut inner, SessionState::Uninitialized);
        tracing::info!(capability = %self.shared.capability, "Session destroyed");
        Ok(())
    }

    // ============================================================================
    // Generation
    // ============================================================================

    /// Sends `text` and waits for the complete reply.
    ///
    /// # Errors
    ///
    /// - `BusyGenerating` if a generation is already in flight
    /// - `NotReady` before a successful `initialize`
    /// - `GenerationFailed` when the resource fails; the user message is
    ///   rolled back and the session returns to `Ready`
    pub async fn send(&self, text: &str) -> Result<SendOutcome> {
        let Some(turn) = self.begin_turn(text, false)? else {
            return Ok(SendOutcome::Ignored);
        };

        let result = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => None,
            reply = turn.resource.invoke(&turn.history, &turn.input) => Some(reply),
        };

        match result {
            None => turn.finish_atomic_cancelled(),
            Some(Ok(reply)) => turn.finish_atomic(reply),
            Some(Err(e)) => Err(turn.fail(e)),
        }
    }

    /// Sends `text` and streams the reply into the history as it grows.
    ///
    /// Preconditions and errors are those of [`send`](Self::send). A failed
    /// stream discards the partial reply and the user message.
    pub async fn send_streaming(&self, text: &str) -> Result<SendOutcome> {
        let Some(turn) = self.begin_turn(text, true)? else {
            return Ok(SendOutcome::Ignored);
        };
        let Some(reply_id) = turn.reply else {
            return Err(turn.fail(OdaError::internal("streaming turn without a reply slot")));
        };

        let stream = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => None,
            stream = turn
                .resource
                .invoke_streaming(&turn.history, &turn.input, turn.cancel.clone()) => Some(stream),
        };
        let stream = match stream {
            None => return turn.finish_streaming(StreamOutcome::Cancelled),
            Some(Ok(stream)) => stream,
            Some(Err(e)) => return Err(turn.fail(e)),
        };

        let shared = self.shared.clone();
        let folded = StreamingAccumulator::new(turn.cancel.clone())
            .run(stream, move |delta, content| {
                let mut inner = shared.lock();
                inner.log.append_to_tail(reply_id, delta)?;
                shared.emit(SessionEvent::MessageUpdated {
                    id: reply_id,
                    delta: delta.to_string(),
                    content: content.to_string(),
                });
                Ok(())
            })
            .await;

        match folded {
            Ok(reply) => turn.finish_streaming(reply.outcome),
            Err(e) => Err(turn.fail(e)),
        }
    }

    /// Signals the in-flight generation to stop at its next suspension point.
    ///
    /// Returns `false` (and does nothing) when no generation is running.
    pub fn cancel(&self) -> bool {
        let inner = self.shared.lock();
        match (&inner.generation, inner.state) {
            (Some(token), SessionState::Generating) => {
                tracing::info!(capability = %self.shared.capability, "Cancelling generation");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Empties the history. The resource is kept.
    ///
    /// An `Errored` session leaves the error state: `Ready` if it still holds
    /// a resource, `Uninitialized` otherwise.
    ///
    /// # Errors
    ///
    /// `BusyGenerating` while a generation is in flight; cancel first.
    pub fn clear_history(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        if inner.state.is_generating() {
            self.shared.record_error(&mut inner, OdaError::BusyGenerating);
            return Err(OdaError::BusyGenerating);
        }
        inner.log.clear();
        self.shared.emit(SessionEvent::HistoryCleared);

        if inner.state == SessionState::Errored {
            let next = if inner.resource.is_some() {
                SessionState::Ready
            } else {
                SessionState::Uninitialized
            };
            self.shared.transition(&mut inner, next);
        }
        Ok(())
    }

    /// Validates preconditions and records the user turn.
    ///
    /// Returns `None` for blank input.
    fn begin_turn(&self, text: &str, streaming: bool) -> Result<Option<Turn>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let mut inner = self.shared.lock();
        let resource = match (inner.state, inner.resource.clone()) {
            (SessionState::Ready, Some(resource)) => resource,
            (SessionState::Generating, _) => {
                self.shared.record_error(&mut inner, OdaError::BusyGenerating);
                return Err(OdaError::BusyGenerating);
            }
            (state, _) => {
                let error = OdaError::not_ready(state);
                self.shared.record_error(&mut inner, error.clone());
                return Err(error);
            }
        };

        let history = inner.log.snapshot();
        let user = self.shared.append(&mut inner, Message::user(text))?.id;
        let reply = if streaming {
            match self.shared.append(&mut inner, Message::pending_assistant()) {
                Ok(message) => Some(message.id),
                Err(e) => {
                    self.shared.rollback(&mut inner, user);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let cancel = CancellationToken::new();
        inner.generation = Some(cancel.clone());
        inner.last_error = None;
        self.shared.transition(&mut inner, SessionState::Generating);
        tracing::debug!(capability = %self.shared.capability, message_id = %user, streaming, "Generation started");

        Ok(Some(Turn {
            shared: self.shared.clone(),
            resource,
            history,
            input: text.to_string(),
            user,
            reply,
            cancel,
            settled: false,
        }))
    }
}

/// One in-flight generation.
///
/// Settling returns the session to `Ready`. If the caller drops the future
/// before it settles, the turn is settled as cancelled on drop.
struct Turn {
    shared: Arc<ControllerShared>,
    resource: Arc<dyn Resource>,
    history: Vec<Message>,
    input: String,
    user: MessageId,
    /// Pending streamed reply
    reply: Option<MessageId>,
    cancel: CancellationToken,
    settled: bool,
}

impl Turn {
    fn finish_atomic(mut self, reply: String) -> Result<SendOutcome> {
        let message = self.settle(|shared, inner| {
            shared.append(inner, Message::assistant(reply))
        })?;
        Ok(SendOutcome::Completed(message))
    }

    fn finish_atomic_cancelled(mut self) -> Result<SendOutcome> {
        let message = self.settle(|shared, inner| {
            let mut message = Message::assistant(String::new());
            message.status = MessageStatus::Cancelled;
            shared.append(inner, message)
        })?;
        Ok(SendOutcome::Cancelled(message))
    }

    fn finish_streaming(mut self, outcome: StreamOutcome) -> Result<SendOutcome> {
        let reply = self.reply;
        let status = match outcome {
            StreamOutcome::Completed => MessageStatus::Complete,
            StreamOutcome::Cancelled => MessageStatus::Cancelled,
        };
        let message = self.settle(|shared, inner| finalize_reply(shared, inner, reply, status))?;
        Ok(match outcome {
            StreamOutcome::Completed => SendOutcome::Completed(message),
            StreamOutcome::Cancelled => SendOutcome::Cancelled(message),
        })
    }

    /// Rolls back the turn and returns the error to hand to the caller.
    fn fail(mut self, error: OdaError) -> OdaError {
        let error = match error {
            OdaError::GenerationFailed(_) | OdaError::HistoryConflict(_) => error,
            other => OdaError::generation_failed(other.to_string()),
        };
        let (user, reply) = (self.user, self.reply);
        let recorded = error.clone();
        let _ = self.settle(move |shared, inner| {
            tracing::warn!(capability = %shared.capability, error = %recorded, "Generation failed, rolling back turn");
            if let Some(reply) = reply {
                shared.rollback(inner, reply);
            }
            shared.rollback(inner, user);
            shared.record_error(inner, recorded);
            Ok(())
        });
        error
    }

    fn settle<T>(
        &mut self,
        apply: impl FnOnce(&ControllerShared, &mut Inner) -> Result<T>,
    ) -> Result<T> {
        self.settled = true;
        let shared = self.shared.clone();
        let mut inner = shared.lock();
        let result = apply(&*shared, &mut *inner);
        if let Err(e) = &result {
            shared.record_error(&mut inner, e.clone());
        }
        inner.generation = None;
        shared.transition(&mut inner, SessionState::Ready);
        result
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::debug!(capability = %self.shared.capability, "Generation dropped before completion");
        self.cancel.cancel();
        let reply = self.reply;
        let _ = self.settle(|shared, inner| match reply {
            Some(_) => finalize_reply(shared, inner, reply, MessageStatus::Cancelled).map(|_| ()),
            None => {
                let mut message = Message::assistant(String::new());
                message.status = MessageStatus::Cancelled;
                shared.append(inner, message).map(|_| ())
            }
        });
    }
}

fn finalize_reply(
    shared: &ControllerShared,
    inner: &mut Inner,
    reply: Option<MessageId>,
    status: MessageStatus,
) -> Result<Message> {
    let id = reply.ok_or_else(|| OdaError::internal("no streamed reply to finalize"))?;
    let message = inner.log.finalize_tail(id, status)?.clone();
    shared.emit(SessionEvent::MessageFinalized {
        message: message.clone(),
    });
    Ok(message)
}

/// Checks support, then builds (or reuses) the resource for `config`.
async fn construct(
    provider: &Arc<dyn CapabilityProvider>,
    probe: &SupportProbe,
    cache: Option<&ResourceCache>,
    progress: &ProgressReporter,
    config: &SessionConfig,
) -> Result<Arc<dyn Resource>> {
    let capability = provider.capability();
    match probe.check(config).await {
        SupportState::Available => {}
        state => {
            return Err(OdaError::unsupported(
                capability,
                format!("host reports support as {state}"),
            ));
        }
    }

    progress.reset();
    let Some(cache) = cache else {
        return provider.create(config, progress.clone()).await;
    };

    let key = provider.resource_key(config);
    let label = key.to_string();
    let constructed_here = AtomicBool::new(false);
    let resource = cache
        .get_or_create(key, || {
            constructed_here.store(true, Ordering::Relaxed);
            let provider = provider.clone();
            let config = config.clone();
            let progress = progress.clone();
            async move { provider.create(&config, progress).await }
        })
        .await?;

    // Progress of a joined construction went to the controller that started it
    if !constructed_here.load(Ordering::Relaxed) {
        progress.report(1.0, &label);
    }
    Ok(resource)
}
