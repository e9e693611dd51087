//! Speech output.
//!
//! [`TtsEngine`] owns a background worker that speaks queued utterances
//! one after another. `speak` only hands the text over, so the caller
//! never waits on synthesis; the dispatcher polls
//! [`SpeechOutput::is_speaking`] when it wants to hold the next command
//! until the reply has been read out.
//!
//! Three engines are available: the operating system's synthesiser
//! through the [`tts`] crate (feature `native-audio`), any external
//! program that reads text on stdin (RHVoice, espeak, piper...), and a
//! silent engine that only logs.

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

pub trait SpeechOutput: Send + Sync {
    /// Queue `text` for playback. Returns immediately; `is_speaking`
    /// reports true from the moment this returns.
    fn speak(&self, text: &str);
    fn is_speaking(&self) -> bool;
    /// Interrupt the current utterance and discard queued ones.
    fn stop(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEngine {
    /// OS synthesiser, optionally selecting a voice by partial name.
    Native {
        #[cfg_attr(not(feature = "native-audio"), allow(dead_code))]
        voice: Option<String>,
    },
    /// External program; the utterance is written to its stdin.
    Command { program: String, args: Vec<String> },
    Silent,
}

struct Utterance {
    text: String,
    epoch: u64,
}

pub struct TtsEngine {
    tx: mpsc::UnboundedSender<Utterance>,
    pending: Arc<AtomicUsize>,
    epoch: watch::Sender<u64>,
}

impl TtsEngine {
    /// Initialise the engine and start its worker. Must be called inside a
    /// Tokio runtime.
    pub fn start(engine: VoiceEngine) -> Result<Self> {
        let backend = Backend::new(engine)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let (epoch, epoch_rx) = watch::channel(0u64);
        tokio::spawn(run_worker(backend, rx, Arc::clone(&pending), epoch_rx));
        Ok(Self { tx, pending, epoch })
    }
}

impl SpeechOutput for TtsEngine {
    fn speak(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        let utterance = Utterance {
            text: text.to_string(),
            epoch: *self.epoch.borrow(),
        };
        if self.tx.send(utterance).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            log::warn!("Speech worker has stopped; dropping utterance");
        }
    }

    fn is_speaking(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    fn stop(&self) {
        self.epoch.send_modify(|e| *e += 1);
    }
}

async fn run_worker(
    backend: Backend,
    mut rx: mpsc::UnboundedReceiver<Utterance>,
    pending: Arc<AtomicUsize>,
    mut epoch: watch::Receiver<u64>,
) {
    while let Some(utterance) = rx.recv().await {
        let current = *epoch.borrow_and_update();
        if utterance.epoch == current {
            tokio::select! {
                res = backend.say(&utterance.text) => {
                    if let Err(e) = res {
                        log::warn!("Speech error: {e:#}");
                    }
                }
                _ = epoch.changed() => {
                    backend.stop();
                    log::debug!("Speech interrupted");
                }
            }
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Backend {
    #[cfg(feature = "native-audio")]
    Native(tts::Tts),
    Command { program: String, args: Vec<String> },
    Silent,
}

impl Backend {
    fn new(engine: VoiceEngine) -> Result<Self> {
        match engine {
            #[cfg(feature = "native-audio")]
            VoiceEngine::Native { voice } => {
                let mut tts =
                    tts::Tts::default().context("failed to initialise text-to-speech engine")?;
                if let Some(name) = voice {
                    match set_voice_by_name(&mut tts, &name) {
                        Ok(()) => log::info!("Using voice: {}", name),
                        Err(e) => log::warn!(
                            "Failed to set voice '{}': {e}. Falling back to default.",
                            name
                        ),
                    }
                }
                Ok(Backend::Native(tts))
            }
            #[cfg(not(feature = "native-audio"))]
            VoiceEngine::Native { .. } => Err(anyhow::anyhow!(
                "native speech needs the `native-audio` feature"
            )),
            VoiceEngine::Command { program, args } => Ok(Backend::Command { program, args }),
            VoiceEngine::Silent => Ok(Backend::Silent),
        }
    }

    /// Speak `text` and return once playback has finished.
    async fn say(&self, text: &str) -> Result<()> {
        match self {
            #[cfg(feature = "native-audio")]
            Backend::Native(tts) => {
                let tts = tts.clone();
                let text = text.to_owned();
                tokio::task::spawn_blocking(move || speak_native(tts, &text))
                    .await
                    .context("failed to join blocking TTS task")?
            }
            Backend::Command { program, args } => {
                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .with_context(|| format!("failed to spawn speech command '{program}'"))?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin
                        .write_all(text.as_bytes())
                        .await
                        .context("failed to write to speech command stdin")?;
                    stdin.shutdown().await.ok();
                }
                let status = child.wait().await.context("speech command failed")?;
                if !status.success() {
                    log::warn!("Speech command exited with {status}");
                }
                Ok(())
            }
            Backend::Silent => {
                log::info!("Jarvis: {}", text);
                Ok(())
            }
        }
    }

    fn stop(&self) {
        match self {
            #[cfg(feature = "native-audio")]
            Backend::Native(tts) => {
                let mut tts = tts.clone();
                if let Err(e) = tts.stop() {
                    log::warn!("Failed to stop TTS: {e:?}");
                }
            }
            // The child is killed when its future is dropped.
            Backend::Command { .. } | Backend::Silent => {}
        }
    }
}

#[cfg(feature = "native-audio")]
fn speak_native(mut tts: tts::Tts, text: &str) -> Result<()> {
    use std::time::{Duration, Instant};

    let _ = tts.stop();
    tts.speak(text, true)
        .map_err(|e| anyhow::anyhow!("TTS speak failed: {e:?}"))?;
    // Not every platform reports progress; those that don't return an
    // error here and we treat the utterance as finished.
    let started = Instant::now();
    while tts.is_speaking().unwrap_or(false) && started.elapsed() < Duration::from_secs(120) {
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

/// Case-insensitive partial match against the installed voices.
#[cfg(feature = "native-audio")]
fn set_voice_by_name(tts: &mut tts::Tts, name: &str) -> Result<()> {
    let target = name.to_lowercase();
    let voices = tts.voices().context("failed to enumerate voices")?;
    let voice = voices
        .into_iter()
        .find(|v| v.name().to_lowercase().contains(&target))
        .ok_or_else(|| anyhow::anyhow!("no voice matching '{name}' found"))?;
    tts.set_voice(&voice).context("failed to set TTS voice")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn wait_idle(engine: &TtsEngine, limit: Duration) -> bool {
        let start = std::time::Instant::now();
        while engine.is_speaking() {
            if start.elapsed() > limit {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    #[tokio::test]
    async fn speaking_flag_is_raised_before_speak_returns() {
        let engine = TtsEngine::start(VoiceEngine::Silent).unwrap();
        assert!(!engine.is_speaking());
        engine.speak("hello there");
        assert!(engine.is_speaking());
        assert!(wait_idle(&engine, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn blank_text_is_ignored() {
        let engine = TtsEngine::start(VoiceEngine::Silent).unwrap();
        engine.speak("   ");
        assert!(!engine.is_speaking());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_interrupts_a_long_utterance() {
        let engine = TtsEngine::start(VoiceEngine::Command {
            program: "sh".into(),
            args: vec!["-c".into(), "cat > /dev/null; sleep 10".into()],
        })
        .unwrap();
        engine.speak("a very long answer");
        engine.speak("and another one queued behind it");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.is_speaking());
        engine.stop();
        assert!(wait_idle(&engine, Duration::from_secs(3)).await);
    }

    #[cfg(not(feature = "native-audio"))]
    #[tokio::test]
    async fn native_engine_requires_feature() {
        assert!(TtsEngine::start(VoiceEngine::Native { voice: None }).is_err());
    }
}
