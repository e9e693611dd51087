//! Entry point for Jarvis, a voice and text desktop assistant.
//!
//! Commands arrive from two places, the microphone and the text prompt
//! on stdin, and land in one queue. A single dispatcher takes them off the
//! queue one at a time:
//!
//!  * Simple requests (time, date, opening applications, playing music,
//!    Google searches, notes, system usage) are answered locally.
//!  * Everything else is sent to a local language model via Ollama.
//!  * The reply is shown, spoken, and only then is the next command taken.
//!
//! Configuration comes from environment variables, see `config.rs`. The
//! most useful ones:
//!
//!  * `VOSK_MODEL_PATH`: path to a Vosk model; without it only text input
//!    is available. Voice input also needs the `native-audio` feature.
//!  * `MODEL_NAME`: name of the local LLM served by Ollama.
//!  * `VOICE_ENGINE`: `native`, `command` (with `VOICE_COMMAND`) or `silent`.
//!  * `RUST_LOG`: log level for the activity log.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::signal;

mod agent;
mod automation;
mod command;
mod config;
mod console;
mod dispatcher;
mod error;
mod handlers;
mod intents;
mod jarvis_io;
mod listener;
mod monitor;
mod observer;
mod queue;
mod speech;
mod tts_engine;

use agent::OllamaAgent;
use automation::{DesktopAutomation, SideEffects};
use command::SharedState;
use config::Config;
use console::ConsoleExit;
use dispatcher::Dispatcher;
use handlers::LocalHandlers;
use jarvis_io::StatusFiles;
use listener::ListenerHandle;
use monitor::SystemMonitor;
use observer::{LogObserver, Observer, Observers};
use tts_engine::{SpeechOutput, TtsEngine, VoiceEngine};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let state = Arc::new(SharedState::new());

    let mut observers = Observers::new().with(Arc::new(LogObserver));
    if config.status_files {
        match StatusFiles::new() {
            Ok(files) => {
                files.set_pid();
                observers = observers.with(Arc::new(files));
            }
            Err(e) => log::warn!("Status files disabled: {e:#}"),
        }
    }
    let observer: Arc<dyn Observer> = Arc::new(observers);

    let speech: Arc<dyn SpeechOutput> = match TtsEngine::start(config.voice_engine.clone()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            log::warn!("Speech output unavailable ({e:#}); replies will only be logged");
            Arc::new(TtsEngine::start(VoiceEngine::Silent)?)
        }
    };

    let monitor = Arc::new(SystemMonitor::new());
    let handlers = LocalHandlers::new(
        Arc::new(DesktopAutomation::new(config.text_editor.as_deref())),
        Arc::clone(&monitor),
        Arc::new(SideEffects::new()),
    );
    let backend = Arc::new(OllamaAgent::new(
        config.ollama_url.clone(),
        &config.model_name,
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(
            config.dispatch_settings(),
            handlers,
            backend,
            Arc::clone(&observer),
            Arc::clone(&state),
        )
        .with_speech(Arc::clone(&speech)),
    );

    let (sender, receiver) = queue::command_queue(Arc::clone(&state), Arc::clone(&observer));

    let listener = start_listener(&config, &sender, &state, &speech, &observer).map(Arc::new);

    let monitor_task = tokio::spawn(monitor::run_monitor(
        monitor,
        Arc::clone(&state),
        Arc::clone(&observer),
        config.monitor_interval,
    ));

    log::info!("System initialized");
    log::info!(
        "Voice input: {}",
        if listener.as_ref().map_or(false, |l| l.is_enabled()) {
            "ACTIVE"
        } else {
            "INACTIVE"
        }
    );
    log::info!("Text input: READY");

    let stdin = BufReader::new(tokio::io::stdin());
    let console = console::run_console(stdin, sender, Arc::clone(&state), listener.clone());
    let mut dispatch_task = tokio::spawn(dispatcher.run(receiver));
    let mut dispatcher_done = false;

    let exit = tokio::select! {
        exit = console => Some(exit),
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                log::error!("Failed to listen for Ctrl-C: {e}");
            }
            log::info!("Received Ctrl-C, shutting down");
            None
        }
    };

    if exit == Some(ConsoleExit::Closed) {
        // The dispatcher stops by itself once the voice listener is gone
        // too and the queue has been worked through.
        if listener.is_some() {
            log::info!("Text input closed; voice input keeps running until Ctrl-C");
        } else {
            log::info!("Text input closed; finishing queued commands");
        }
        tokio::select! {
            res = &mut dispatch_task => {
                dispatcher_done = true;
                if let Err(e) = res {
                    log::error!("Dispatcher task failed: {e}");
                }
            }
            res = signal::ctrl_c() => {
                if let Err(e) = res {
                    log::error!("Failed to listen for Ctrl-C: {e}");
                }
                log::info!("Received Ctrl-C, shutting down");
            }
        }
    } else if exit == Some(ConsoleExit::Quit) {
        log::info!("Quit requested, shutting down");
    }

    state.request_shutdown();
    speech.stop();
    if !dispatcher_done {
        if let Err(e) = dispatch_task.await {
            log::error!("Dispatcher task failed: {e}");
        }
    }
    monitor_task.abort();
    if let Some(listener) = listener.and_then(|l| Arc::try_unwrap(l).ok()) {
        // Blocks until an in-progress recognition returns.
        tokio::task::spawn_blocking(move || listener.stop()).await.ok();
    }
    // The stdin reader runs on a thread that cannot be cancelled; exit
    // rather than wait for another line of input.
    std::process::exit(0)
}

#[cfg(feature = "native-audio")]
fn start_listener(
    config: &Config,
    sender: &queue::CommandSender,
    state: &Arc<SharedState>,
    speech: &Arc<dyn SpeechOutput>,
    observer: &Arc<dyn Observer>,
) -> Option<ListenerHandle> {
    let Some(model_path) = config.vosk_model_path.as_deref() else {
        log::info!("VOSK_MODEL_PATH not set; voice input disabled");
        return None;
    };
    let recognizer = speech::SpeechRecognizer::new(model_path, config.phrase_limit, &config.mic);
    let recognizer = match recognizer {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Voice input disabled: {e:#}");
            return None;
        }
    };
    let listener = listener::VoiceListener {
        sender: sender.clone(),
        state: Arc::clone(state),
        speech: Some(Arc::clone(speech)),
        observer: Arc::clone(observer),
    };
    match listener.spawn(recognizer, config.voice_input) {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("Failed to start voice listener: {e}");
            None
        }
    }
}

#[cfg(not(feature = "native-audio"))]
fn start_listener(
    config: &Config,
    _sender: &queue::CommandSender,
    _state: &Arc<SharedState>,
    _speech: &Arc<dyn SpeechOutput>,
    _observer: &Arc<dyn Observer>,
) -> Option<ListenerHandle> {
    if config.vosk_model_path.is_some() {
        log::warn!("VOSK_MODEL_PATH is set but this build lacks the `native-audio` feature");
    }
    None
}
