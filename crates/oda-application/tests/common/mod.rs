#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use oda_application::SessionController;
use oda_core::config::SessionConfig;
use oda_core::progress::ProgressReporter;
use oda_core::session::{Message, SessionState};
use oda_core::{
    Availability, Capability, CapabilityProvider, OdaError, Resource, Result, TextStream,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// What a scripted resource does when invoked.
#[derive(Clone)]
pub enum Script {
    /// Replies `echo: <input>`
    Echo,
    Fail(String),
    /// Never completes
    Hang,
    /// Streams `chunks`, then either ends or stays open
    Stream { chunks: Vec<String>, hold_open: bool },
    /// Streams `chunks`, then fails
    StreamThenFail { chunks: Vec<String>, error: String },
}

pub struct ScriptedResource {
    script: Mutex<Script>,
    pub calls: AtomicUsize,
    /// History length seen by every invocation
    pub history_lens: Mutex<Vec<usize>>,
}

impl ScriptedResource {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            history_lens: Mutex::new(Vec::new()),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    fn record(&self, history: &[Message]) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history_lens.lock().unwrap().push(history.len());
        self.script.lock().unwrap().clone()
    }
}

pub fn chunks(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl Resource for ScriptedResource {
    async fn invoke(&self, history: &[Message], input: &str) -> Result<String> {
        match self.record(history) {
            Script::Echo => Ok(format!("echo: {input}")),
            Script::Fail(reason) => Err(OdaError::generation_failed(reason)),
            Script::Hang => std::future::pending().await,
            Script::Stream { chunks, .. } => Ok(chunks.concat()),
            Script::StreamThenFail { error, .. } => Err(OdaError::generation_failed(error)),
        }
    }

    async fn invoke_streaming(
        &self,
        history: &[Message],
        input: &str,
        _cancel: CancellationToken,
    ) -> Result<TextStream> {
        let stream = match self.record(history) {
            Script::Echo => stream::iter(vec![Ok(format!("echo: {input}"))]).boxed(),
            Script::Fail(reason) => return Err(OdaError::generation_failed(reason)),
            Script::Hang => stream::pending().boxed(),
            Script::Stream { chunks, hold_open } => {
                let head = stream::iter(chunks.into_iter().map(Ok));
                if hold_open {
                    head.chain(stream::pending()).boxed()
                } else {
                    head.boxed()
                }
            }
            Script::StreamThenFail { chunks, error } => stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::once(async move { Err(OdaError::generation_failed(error)) }))
                .boxed(),
        };
        Ok(stream)
    }
}

/// Provider handing out one shared scripted resource.
pub struct MockProvider {
    availability: Mutex<Availability>,
    resource: Arc<ScriptedResource>,
    /// Construction waits on this gate when set
    gate: Option<Arc<Notify>>,
    /// Number of upcoming constructions that fail
    failures: AtomicUsize,
    pub creates: AtomicUsize,
}

impl MockProvider {
    pub fn new(resource: Arc<ScriptedResource>) -> Self {
        Self {
            availability: Mutex::new(Availability::Available),
            resource,
            gate: None,
            failures: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
        }
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_availability(self, availability: Availability) -> Self {
        self.set_availability(availability);
        self
    }

    pub fn failing_next(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn set_availability(&self, availability: Availability) {
        *self.availability.lock().unwrap() = availability;
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for MockProvider {
    fn capability(&self) -> Capability {
        Capability::Chat
    }

    async fn availability(&self, _config: &SessionConfig) -> Result<Availability> {
        Ok(*self.availability.lock().unwrap())
    }

    async fn create(
        &self,
        config: &SessionConfig,
        progress: ProgressReporter,
    ) -> Result<Arc<dyn Resource>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let model = config.model.clone().unwrap_or_else(|| "default".to_string());
        progress.report(0.5, &model);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(OdaError::construction("weights download interrupted"));
        }

        progress.report(1.0, &model);
        Ok(self.resource.clone())
    }
}

/// Controller over `script`, already initialized.
pub async fn ready_controller(script: Script) -> (Arc<SessionController>, Arc<ScriptedResource>) {
    let resource = ScriptedResource::new(script);
    let provider = Arc::new(MockProvider::new(resource.clone()));
    let controller = Arc::new(SessionController::new(provider));
    assert!(controller.initialize(None).await, "Should initialize");
    (controller, resource)
}

/// Waits until `controller` reaches `state`, failing after one second.
pub async fn wait_for_state(controller: &SessionController, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while controller.state() != state {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("Should reach expected state");
}
