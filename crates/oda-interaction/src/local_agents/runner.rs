//! LocalRunnerProvider - chat backed by a local model-runner CLI.
//!
//! Each generation spawns the configured command (for example `llama-cli`)
//! with the model file, sampling options and the rendered prompt. Atomic
//! replies read stdout to completion; streamed replies forward stdout as it
//! arrives.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use oda_core::config::{GenerationOptions, LocalRunnerConfig, SessionConfig};
use oda_core::progress::ProgressReporter;
use oda_core::session::{Message, MessageRole};
use oda_core::{
    Availability, Capability, CapabilityProvider, OdaError, Resource, Result, TextStream,
};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::supported_models::{DEFAULT_MODEL, model_file_name};

const READ_CHUNK: usize = 1024;

/// Capability provider spawning a local model runner.
pub struct LocalRunnerProvider {
    config: LocalRunnerConfig,
}

impl LocalRunnerProvider {
    pub fn new(config: LocalRunnerConfig) -> Self {
        Self { config }
    }

    fn model_id<'a>(&self, session: &'a SessionConfig) -> &'a str {
        session.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Where the model file for `model` is expected, when a model directory
    /// is configured.
    pub fn model_path(&self, model: &str) -> Option<PathBuf> {
        self.config
            .model_dir
            .as_ref()
            .map(|dir| dir.join(model_file_name(model)))
    }

    /// Checks if the runner command is on `PATH`.
    pub async fn command_available(&self) -> bool {
        #[cfg(unix)]
        let check_cmd = "which";
        #[cfg(windows)]
        let check_cmd = "where";

        Command::new(check_cmd)
            .arg(&self.config.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl CapabilityProvider for LocalRunnerProvider {
    fn capability(&self) -> Capability {
        Capability::Chat
    }

    async fn availability(&self, session: &SessionConfig) -> Result<Availability> {
        if !self.command_available().await {
            tracing::debug!(command = %self.config.command, "Runner command not found in PATH");
            return Ok(Availability::Unavailable);
        }

        let model = self.model_id(session);
        match self.model_path(model) {
            Some(path) if !path.exists() => {
                tracing::debug!(model, path = %path.display(), "Model file not downloaded yet");
                Ok(Availability::Downloadable)
            }
            _ => Ok(Availability::Available),
        }
    }

    async fn create(
        &self,
        session: &SessionConfig,
        progress: ProgressReporter,
    ) -> Result<Arc<dyn Resource>> {
        let model = self.model_id(session).to_string();
        progress.report(0.0, &model);

        let model_path = self.model_path(&model);
        if let Some(path) = &model_path {
            if !path.exists() {
                return Err(OdaError::construction(format!(
                    "model file {} is missing; download {model} into {}",
                    path.display(),
                    path.parent().map(|p| p.display().to_string()).unwrap_or_default()
                )));
            }
        }
        if !self.command_available().await {
            return Err(OdaError::construction(format!(
                "{} not found in PATH",
                self.config.command
            )));
        }

        progress.report(1.0, &model);
        tracing::info!(model = %model, command = %self.config.command, "Local runner ready");

        Ok(Arc::new(LocalRunnerResource {
            command: self.config.command.clone(),
            args: self.config.args.clone(),
            model_path,
            options: session.generation.clone(),
        }))
    }
}

/// A loaded local runner: the command line used for every generation.
#[derive(Debug, Clone)]
pub struct LocalRunnerResource {
    command: String,
    args: Vec<String>,
    model_path: Option<PathBuf>,
    options: GenerationOptions,
}

impl LocalRunnerResource {
    /// Builds the command with all arguments.
    fn build_command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);

        if let Some(path) = &self.model_path {
            cmd.arg("-m").arg(path);
        }
        cmd.arg("--temp")
            .arg(self.options.temperature.to_string())
            .arg("-n")
            .arg(self.options.max_tokens.to_string())
            .arg("-p")
            .arg(prompt);

        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn runner_failed(&self, status: ExitStatus, stderr: &str) -> OdaError {
        OdaError::generation_failed(format!(
            "{} exited with {status}: {}",
            self.command,
            stderr.trim()
        ))
    }
}

#[async_trait]
impl Resource for LocalRunnerResource {
    async fn invoke(&self, history: &[Message], input: &str) -> Result<String> {
        let prompt = build_prompt(self.options.system_prompt.as_deref(), history, input);
        tracing::debug!(command = %self.command, prompt_len = prompt.len(), "Running local model");

        let output = self.build_command(&prompt).output().await.map_err(|e| {
            OdaError::generation_failed(format!("failed to run {}: {e}", self.command))
        })?;

        if output.status.success() {
            let response = String::from_utf8_lossy(&output.stdout);
            tracing::debug!(response_len = response.len(), "Local model finished");
            Ok(response.trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(self.runner_failed(output.status, &stderr))
        }
    }

    async fn invoke_streaming(
        &self,
        history: &[Message],
        input: &str,
        cancel: CancellationToken,
    ) -> Result<TextStream> {
        let prompt = build_prompt(self.options.system_prompt.as_deref(), history, input);
        let mut child = self
            .build_command(&prompt)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                OdaError::generation_failed(format!("failed to start {}: {e}", self.command))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OdaError::internal("runner stdout was not captured"))?;
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

        let output = RunnerOutput {
            resource: self.clone(),
            child,
            stdout,
            stderr,
            carry: Vec::new(),
            cancel,
            done: false,
        };

        Ok(stream::unfold(output, |mut output| async move {
            let item = output.next_chunk().await?;
            Some((item, output))
        })
        .boxed())
    }
}

/// Child process state behind a streamed reply.
struct RunnerOutput {
    resource: LocalRunnerResource,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    /// Bytes of an incomplete UTF-8 sequence
    carry: Vec<u8>,
    cancel: CancellationToken,
    done: bool,
}

impl RunnerOutput {
    async fn next_chunk(&mut self) -> Option<Result<String>> {
        if self.done {
            return None;
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.stop().await;
                    return None;
                }
                read = self.stdout.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    self.done = true;
                    return self.finish().await;
                }
                Ok(n) => {
                    self.carry.extend_from_slice(&buf[..n]);
                    let text = take_utf8(&mut self.carry);
                    if !text.is_empty() {
                        return Some(Ok(text));
                    }
                }
                Err(e) => {
                    self.stop().await;
                    return Some(Err(OdaError::generation_failed(format!(
                        "failed to read runner output: {e}"
                    ))));
                }
            }
        }
    }

    /// Reaps the child after stdout closed.
    async fn finish(&mut self) -> Option<Result<String>> {
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return Some(Err(OdaError::generation_failed(format!(
                    "failed to wait for runner: {e}"
                ))));
            }
        };

        if !status.success() {
            let stderr = match self.stderr.take() {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };
            return Some(Err(self.resource.runner_failed(status, &stderr)));
        }

        if self.carry.is_empty() {
            None
        } else {
            let rest = String::from_utf8_lossy(&self.carry).into_owned();
            self.carry.clear();
            Some(Ok(rest))
        }
    }

    async fn stop(&mut self) {
        self.done = true;
        tracing::debug!(command = %self.resource.command, "Stopping local runner");
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Runner already exited");
        }
        let _ = self.child.wait().await;
    }
}

/// Decodes `carry` up to a trailing incomplete sequence, which stays in
/// `carry` for the next read. Invalid bytes become U+FFFD.
fn take_utf8(carry: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut consumed = 0;
    loop {
        match std::str::from_utf8(&carry[consumed..]) {
            Ok(valid) => {
                text.push_str(valid);
                consumed = carry.len();
                break;
            }
            Err(e) => {
                let valid_end = consumed + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&carry[consumed..valid_end]));
                match e.error_len() {
                    Some(invalid) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        consumed = valid_end + invalid;
                    }
                    None => {
                        consumed = valid_end;
                        break;
                    }
                }
            }
        }
    }
    carry.drain(..consumed);
    text
}

async fn read_all<R: AsyncRead + Unpin>(mut pipe: R) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut bytes).await {
        tracing::debug!(error = %e, "Failed to read runner stderr");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Renders the conversation as a plain transcript ending with an open
/// assistant turn.
///
/// Cancelled or empty assistant replies are left out.
pub fn build_prompt(system_prompt: Option<&str>, history: &[Message], input: &str) -> String {
    let mut prompt = String::new();
    if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
        prompt.push_str("System: ");
        prompt.push_str(system.trim());
        prompt.push('\n');
    }

    for message in history {
        if message.is_cancelled() || message.content.trim().is_empty() {
            continue;
        }
        let speaker = match message.role {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        };
        prompt.push_str(speaker);
        prompt.push_str(": ");
        prompt.push_str(message.content.trim());
        prompt.push('\n');
    }

    prompt.push_str("User: ");
    prompt.push_str(input.trim());
    prompt.push_str("\nAssistant:");
    prompt
}
