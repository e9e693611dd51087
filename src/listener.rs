//! Continuous voice capture feeding the command queue.
//!
//! The listener runs on its own thread because recognition blocks. It
//! stays quiet while a command is being processed or a reply is being
//! spoken, so Jarvis never hears itself.

#![cfg_attr(not(feature = "native-audio"), allow(dead_code))]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::command::{SharedState, Source, Status};
use crate::observer::Observer;
use crate::queue::CommandSender;
use crate::speech::{Recognition, Transcriber};
use crate::tts_engine::SpeechOutput;

/// Tokens the recogniser tends to produce from background noise. They are
/// dropped from the ends of a transcript, never from the middle.
const NOISE_WORDS: &[&str] = &["the", "uh", "um", "a", "huh"];

const IDLE_POLL: Duration = Duration::from_millis(100);
/// Pause after a command is queued so one utterance isn't picked up twice.
const DEBOUNCE: Duration = Duration::from_millis(500);

pub fn strip_noise_words(text: &str) -> String {
    let is_noise = |t: &&str| NOISE_WORDS.contains(&t.to_lowercase().as_str());
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let start = tokens.iter().position(|t| !is_noise(t)).unwrap_or(tokens.len());
    let end = tokens
        .iter()
        .rposition(|t| !is_noise(t))
        .map_or(start, |i| i + 1);
    tokens[start..end.max(start)].join(" ")
}

pub struct VoiceListener {
    pub sender: CommandSender,
    pub state: Arc<SharedState>,
    pub speech: Option<Arc<dyn SpeechOutput>>,
    pub observer: Arc<dyn Observer>,
}

pub struct ListenerHandle {
    running: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        log::info!(
            "Voice input: {}",
            if enabled { "ENABLED" } else { "DISABLED" }
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Ask the thread to exit and wait for it. A recognition already in
    /// progress finishes first.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Voice listener thread panicked");
            }
        }
    }
}

impl VoiceListener {
    pub fn spawn<T>(self, transcriber: T, enabled: bool) -> std::io::Result<ListenerHandle>
    where
        T: Transcriber + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let enabled = Arc::new(AtomicBool::new(enabled));
        let thread = thread::Builder::new().name("voice-listener".into()).spawn({
            let running = Arc::clone(&running);
            let enabled = Arc::clone(&enabled);
            move || self.run(transcriber, &running, &enabled)
        })?;
        Ok(ListenerHandle {
            running,
            enabled,
            thread: Some(thread),
        })
    }

    fn busy(&self) -> bool {
        self.state.is_processing()
            || self.speech.as_ref().map_or(false, |s| s.is_speaking())
    }

    fn run<T: Transcriber>(self, mut transcriber: T, running: &AtomicBool, enabled: &AtomicBool) {
        log::info!("Voice listener started");
        while running.load(Ordering::Acquire) && !self.state.is_shutdown() {
            if !enabled.load(Ordering::Acquire) || self.busy() {
                thread::sleep(IDLE_POLL);
                continue;
            }
            self.observer.on_status(Status::Listening);
            match transcriber.listen() {
                Recognition::Recognized(text) => {
                    let cleaned = strip_noise_words(&text);
                    if cleaned.chars().count() > 1 {
                        log::info!("Voice input: {}", cleaned);
                        self.sender.enqueue(cleaned, Source::Voice);
                        thread::sleep(DEBOUNCE);
                    } else {
                        log::debug!("Ignoring noise transcript: {:?}", text);
                    }
                }
                Recognition::NoSpeech => {}
                Recognition::ServiceError(detail) => {
                    log::warn!("Speech recognition error: {detail}");
                }
            }
            thread::sleep(IDLE_POLL);
        }
        log::info!("Voice listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;
    use crate::observer::testing::RecordingObserver;
    use crate::queue::command_queue;

    #[test]
    fn strips_noise_only_at_the_ends() {
        assert_eq!(strip_noise_words("uh open the calculator um"), "open the calculator");
        assert_eq!(strip_noise_words("The"), "");
        assert_eq!(strip_noise_words("  "), "");
        assert_eq!(strip_noise_words("what time is it"), "what time is it");
    }

    /// Plays back a fixed script, then reports silence.
    struct Script {
        items: Arc<Mutex<VecDeque<Recognition>>>,
        calls: Arc<Mutex<usize>>,
    }

    impl Transcriber for Script {
        fn listen(&mut self) -> Recognition {
            *self.calls.lock().unwrap() += 1;
            thread::sleep(Duration::from_millis(5));
            self.items
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Recognition::NoSpeech)
        }
    }

    fn wait_until(limit: Duration, mut f: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queues_recognised_speech_and_skips_the_rest() {
        let state = Arc::new(SharedState::new());
        let observer = Arc::new(RecordingObserver::default());
        let (sender, mut rx) = command_queue(Arc::clone(&state), observer.clone());
        let script = Script {
            items: Arc::new(Mutex::new(VecDeque::from(vec![
                Recognition::NoSpeech,
                Recognition::ServiceError("network down".into()),
                Recognition::Recognized("uh".into()),
                Recognition::Recognized("um open chrome".into()),
            ]))),
            calls: Arc::default(),
        };
        let handle = VoiceListener {
            sender,
            state: Arc::clone(&state),
            speech: None,
            observer: observer.clone(),
        }
        .spawn(script, true)
        .unwrap();

        let cmd = rx
            .dequeue_blocking(Duration::from_secs(5))
            .await
            .expect("voice command queued");
        assert_eq!(cmd.text(), "open chrome");
        assert_eq!(cmd.source(), Source::Voice);
        assert!(observer.statuses().contains(&Status::Listening));

        tokio::task::spawn_blocking(move || handle.stop()).await.unwrap();
        assert!(rx.dequeue_blocking(Duration::from_millis(20)).await.is_none());
    }

    #[test]
    fn suppressed_while_processing_or_disabled() {
        let state = Arc::new(SharedState::new());
        let observer = Arc::new(RecordingObserver::default());
        let (sender, _rx) = command_queue(Arc::clone(&state), observer.clone());
        let calls = Arc::new(Mutex::new(0));
        let script = Script {
            items: Arc::default(),
            calls: Arc::clone(&calls),
        };
        state.set_processing(true);
        let handle = VoiceListener {
            sender,
            state: Arc::clone(&state),
            speech: None,
            observer,
        }
        .spawn(script, true)
        .unwrap();

        thread::sleep(Duration::from_millis(250));
        assert_eq!(*calls.lock().unwrap(), 0, "must not listen while processing");

        state.set_processing(false);
        assert!(wait_until(Duration::from_secs(2), || *calls.lock().unwrap() > 0));

        handle.set_enabled(false);
        thread::sleep(Duration::from_millis(250));
        let before = *calls.lock().unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(*calls.lock().unwrap(), before, "must not listen while disabled");
        assert!(!handle.is_enabled());
        handle.stop();
    }

    /// Speech output whose busy flag is set by the test.
    #[derive(Default)]
    struct Speaking(AtomicBool);

    impl SpeechOutput for Speaking {
        fn speak(&self, _text: &str) {
            self.0.store(true, Ordering::SeqCst);
        }

        fn is_speaking(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn stop(&self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn suppressed_while_speaking() {
        let state = Arc::new(SharedState::new());
        let observer = Arc::new(RecordingObserver::default());
        let (sender, _rx) = command_queue(Arc::clone(&state), observer.clone());
        let calls = Arc::new(Mutex::new(0));
        let script = Script {
            items: Arc::default(),
            calls: Arc::clone(&calls),
        };
        let speech = Arc::new(Speaking::default());
        speech.speak("The current time is 09:15 AM");
        let handle = VoiceListener {
            sender,
            state: Arc::clone(&state),
            speech: Some(speech.clone()),
            observer: observer.clone(),
        }
        .spawn(script, true)
        .unwrap();

        thread::sleep(Duration::from_millis(250));
        assert_eq!(*calls.lock().unwrap(), 0, "must not listen while speaking");
        assert!(!observer.statuses().contains(&Status::Listening));

        speech.stop();
        assert!(wait_until(Duration::from_secs(2), || *calls.lock().unwrap() > 0));
        handle.stop();
    }
}
