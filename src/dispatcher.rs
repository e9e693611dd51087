//! The single consumer of the command queue.
//!
//! One command is handled at a time: classify it, reply locally or ask
//! the chat backend, report the reply, optionally wait for it to be
//! spoken, then take the next one. Nothing a handler or the backend does
//! can take the loop down; failures turn into fixed replies.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::time::{sleep, timeout};

use crate::agent::ChatBackend;
use crate::command::{Command, SharedState, Status};
use crate::error::BackendError;
use crate::handlers::LocalHandlers;
use crate::intents;
use crate::observer::Observer;
use crate::queue::CommandReceiver;
use crate::tts_engine::SpeechOutput;

pub const BACKEND_FALLBACK: &str = "I'm having trouble accessing my neural network.";
pub const HANDLER_FAILURE: &str = "Something went wrong while handling that command.";

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub system_prompt: String,
    /// How long each dequeue waits before checking for shutdown.
    pub poll_interval: Duration,
    pub backend_timeout: Duration,
    /// Hold the next command until the current reply has been spoken.
    pub wait_for_speech: bool,
    /// Upper bound on that wait; speech still going after this is stopped.
    pub speech_wait_timeout: Duration,
    /// How long shutdown waits for outstanding side effects.
    pub drain_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are JARVIS. Be concise and helpful.".to_string(),
            poll_interval: Duration::from_millis(100),
            backend_timeout: Duration::from_secs(30),
            wait_for_speech: true,
            speech_wait_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(3),
        }
    }
}

pub struct Dispatcher {
    settings: DispatchSettings,
    handlers: LocalHandlers,
    backend: Arc<dyn ChatBackend>,
    speech: Option<Arc<dyn SpeechOutput>>,
    observer: Arc<dyn Observer>,
    state: Arc<SharedState>,
}

impl Dispatcher {
    pub fn new(
        settings: DispatchSettings,
        handlers: LocalHandlers,
        backend: Arc<dyn ChatBackend>,
        observer: Arc<dyn Observer>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            settings,
            handlers,
            backend,
            speech: None,
            observer,
            state,
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechOutput>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Drain `receiver` until shutdown is requested on the shared state or
    /// every command source has closed and the queue is empty, then wait
    /// briefly for outstanding side effects.
    pub async fn run(self: Arc<Self>, mut receiver: CommandReceiver) {
        log::info!("Command dispatcher ready");
        self.observer.on_status(Status::Ready);
        while !self.state.is_shutdown() {
            match receiver.dequeue_blocking(self.settings.poll_interval).await {
                Some(command) => {
                    Arc::clone(&self).process(command).await;
                }
                None if receiver.is_finished() => {
                    log::info!("All command sources closed");
                    break;
                }
                None => {}
            }
        }
        for command in receiver.take_remaining() {
            log::warn!(
                "Shutting down; dropping unprocessed {} command: {}",
                command.source(),
                command.text()
            );
        }
        let effects = self.handlers.effects();
        log::info!(
            "Command dispatcher stopping ({} side effect(s) outstanding)",
            effects.outstanding()
        );
        effects.drain(self.settings.drain_timeout).await;
    }

    /// Handle one command from start to finish and return the reply.
    pub async fn process(self: Arc<Self>, command: Command) -> String {
        self.state.set_processing(true);
        self.observer.on_status(Status::Processing);
        self.observer.on_command(&command);

        // Run in its own task so a panicking handler surfaces as a
        // JoinError here instead of unwinding through the loop.
        let worker = Arc::clone(&self);
        let cmd = command.clone();
        let response = match tokio::spawn(async move { worker.respond(&cmd).await }).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Handling '{}' failed: {e}", command.text());
                HANDLER_FAILURE.to_string()
            }
        };

        self.observer.on_response(&command, &response);
        if let Some(speech) = &self.speech {
            speech.speak(&response);
            if self.settings.wait_for_speech {
                self.wait_for_speech(speech.as_ref()).await;
            }
        }

        self.state.set_processing(false);
        self.observer.on_status(Status::Ready);
        response
    }

    async fn respond(&self, command: &Command) -> String {
        let text = command.text();
        let lower = text.to_lowercase();
        if let Some(intent) = intents::classify(&lower) {
            log::debug!("Matched intent '{}' for: {}", intent.name(), text);
            if let Some(reply) = self.handlers.handle(intent, text, &lower, Local::now()) {
                return reply;
            }
            log::debug!("Intent '{}' had nothing to act on", intent.name());
        }
        self.ask_backend(text).await
    }

    async fn ask_backend(&self, text: &str) -> String {
        let call = self.backend.chat(&self.settings.system_prompt, text);
        let result = match timeout(self.settings.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.settings.backend_timeout)),
        };
        result.unwrap_or_else(|e| {
            log::warn!("AI error: {e}");
            BACKEND_FALLBACK.to_string()
        })
    }

    async fn wait_for_speech(&self, speech: &dyn SpeechOutput) {
        let started = Instant::now();
        while speech.is_speaking() {
            if started.elapsed() >= self.settings.speech_wait_timeout {
                log::warn!(
                    "Speech still running after {:?}; stopping it",
                    self.settings.speech_wait_timeout
                );
                speech.stop();
                return;
            }
            sleep(self.settings.poll_interval.min(Duration::from_millis(100))).await;
        }
    }
}
