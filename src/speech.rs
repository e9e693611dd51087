//! Speech-to-text.
//!
//! The voice listener only depends on [`Transcriber`]. With the
//! `native-audio` feature, [`SpeechRecognizer`] implements it with
//! [`cpal`] for microphone capture and [`vosk`] for offline recognition.
//!
//! The microphone is chosen by [`MicSelection`], falling back to the
//! default input device.

#![cfg_attr(not(feature = "native-audio"), allow(dead_code))]

/// Outcome of one listening attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Recognized(String),
    /// Nothing intelligible was said.
    NoSpeech,
    /// Audio or recogniser failure. Usually transient.
    ServiceError(String),
}

/// Which input device to record from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MicSelection {
    /// Position among the input devices (`MIC_INDEX`).
    pub index: Option<usize>,
    /// Case-insensitive substring of the device name (`MIC_NAME_KEYWORD`).
    /// Used when `index` is unset or out of range.
    pub name_keyword: Option<String>,
}

pub trait Transcriber: Send {
    /// Capture one phrase and transcribe it. Blocks for up to the phrase
    /// time limit.
    fn listen(&mut self) -> Recognition;
}

#[cfg(feature = "native-audio")]
pub use native::SpeechRecognizer;

#[cfg(feature = "native-audio")]
mod native {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use anyhow::{anyhow, Context, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleFormat;
    use vosk::{Model, Recognizer};

    use super::{MicSelection, Recognition, Transcriber};

    /// Floor for the speech amplitude threshold after calibration.
    const MIN_THRESHOLD: i16 = 300;
    const CALIBRATION: Duration = Duration::from_millis(300);
    const SILENCE_TIMEOUT: Duration = Duration::from_millis(500);
    const MIN_CAPTURE: Duration = Duration::from_millis(800);

    pub struct SpeechRecognizer {
        model: Model,
        device: cpal::Device,
        phrase_limit: Duration,
        threshold: i16,
    }

    impl SpeechRecognizer {
        /// Load the Vosk model at `model_path`, pick a microphone and
        /// measure the room's background level.
        pub fn new(
            model_path: &str,
            phrase_limit: Duration,
            mic: &MicSelection,
        ) -> Result<Self> {
            let model = Model::new(model_path)
                .ok_or_else(|| anyhow!("Failed to load Vosk model from '{}'.", model_path))?;
            let device = select_device(mic)?;
            if let Ok(name) = device.name() {
                log::info!("Using microphone: {}", name);
            }
            let mut recognizer = Self {
                model,
                device,
                phrase_limit,
                threshold: MIN_THRESHOLD,
            };
            recognizer.calibrate()?;
            Ok(recognizer)
        }

        /// Set the speech threshold to half again the ambient peak.
        fn calibrate(&mut self) -> Result<()> {
            let (samples, _) = self.capture(CALIBRATION, false)?;
            let ambient = samples.iter().map(|s| s.saturating_abs()).max().unwrap_or(0);
            self.threshold = ambient.saturating_add(ambient / 2).max(MIN_THRESHOLD);
            log::debug!("Speech threshold calibrated to {}", self.threshold);
            Ok(())
        }

        /// Record mono i16 samples for up to `limit`. With `stop_on_silence`
        /// the capture ends once speech has started and then gone quiet.
        fn capture(&self, limit: Duration, stop_on_silence: bool) -> Result<(Vec<i16>, f32)> {
            let config = self
                .device
                .default_input_config()
                .context("Failed to get default input configuration")?;
            let sample_rate = config.sample_rate().0 as f32;
            let channels = config.channels() as usize;
            let (tx, rx) = mpsc::channel::<Vec<i16>>();
            let err_fn = |err| log::error!("An error occurred on the input audio stream: {}", err);

            let stream = match config.sample_format() {
                SampleFormat::I16 => self.device.build_input_stream(
                    &config.into(),
                    move |data: &[i16], _| {
                        let _ = tx.send(first_channel(data, channels, |s| s));
                    },
                    err_fn,
                    None,
                )?,
                SampleFormat::U16 => self.device.build_input_stream(
                    &config.into(),
                    move |data: &[u16], _| {
                        let _ = tx.send(first_channel(data, channels, |s| {
                            (s as i32 - 32768) as i16
                        }));
                    },
                    err_fn,
                    None,
                )?,
                SampleFormat::F32 => self.device.build_input_stream(
                    &config.into(),
                    move |data: &[f32], _| {
                        let _ = tx.send(first_channel(data, channels, |s| {
                            (s * 32768.0).clamp(-32768.0, 32767.0) as i16
                        }));
                    },
                    err_fn,
                    None,
                )?,
                other => return Err(anyhow!("Unsupported sample format: {:?}", other)),
            };
            stream.play().context("Failed to start audio input stream")?;

            let started = Instant::now();
            let mut samples = Vec::new();
            let mut speech_started = false;
            let mut last_speech = Instant::now();
            while let Some(remaining) = limit.checked_sub(started.elapsed()) {
                let chunk = match rx.recv_timeout(remaining) {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                };
                if chunk.iter().any(|s| s.saturating_abs() > self.threshold) {
                    speech_started = true;
                    last_speech = Instant::now();
                }
                samples.extend_from_slice(&chunk);
                if stop_on_silence
                    && speech_started
                    && started.elapsed() > MIN_CAPTURE
                    && last_speech.elapsed() > SILENCE_TIMEOUT
                {
                    break;
                }
            }
            drop(stream);
            if stop_on_silence && !speech_started {
                samples.clear();
            }
            Ok((samples, sample_rate))
        }

        fn transcribe(&self) -> Result<String> {
            let (samples, sample_rate) = self.capture(self.phrase_limit, true)?;
            if samples.is_empty() {
                return Ok(String::new());
            }
            let mut recognizer = Recognizer::new(&self.model, sample_rate)
                .ok_or_else(|| anyhow!("Failed to create Vosk recogniser"))?;
            recognizer.set_words(false);
            recognizer.set_max_alternatives(0);
            recognizer
                .accept_waveform(&samples)
                .map_err(|e| anyhow!("Vosk rejected audio: {e:?}"))?;
            Ok(recognizer
                .final_result()
                .single()
                .map(|r| r.text.to_string())
                .unwrap_or_default())
        }
    }

    impl Transcriber for SpeechRecognizer {
        fn listen(&mut self) -> Recognition {
            match self.transcribe() {
                Ok(text) if text.trim().is_empty() => Recognition::NoSpeech,
                Ok(text) => Recognition::Recognized(text),
                Err(e) => Recognition::ServiceError(format!("{e:#}")),
            }
        }
    }

    fn first_channel<T: Copy>(data: &[T], channels: usize, f: impl Fn(T) -> i16) -> Vec<i16> {
        data.chunks(channels.max(1)).map(|frame| f(frame[0])).collect()
    }

    fn select_device(mic: &MicSelection) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host
            .input_devices()
            .context("Failed to enumerate input audio devices")?
            .collect();

        let by_index = mic.index.and_then(|idx| {
            let device = devices.get(idx).cloned();
            if device.is_none() {
                log::warn!("MIC_INDEX {} is out of range ({} devices)", idx, devices.len());
            }
            device
        });
        let by_name = || {
            let keyword = mic.name_keyword.as_ref()?.to_lowercase();
            devices
                .iter()
                .find(|d| {
                    d.name()
                        .map(|n| n.to_lowercase().contains(&keyword))
                        .unwrap_or(false)
                })
                .cloned()
        };
        by_index
            .or_else(by_name)
            .or_else(|| host.default_input_device())
            .ok_or_else(|| anyhow!("No input audio device found"))
    }
}
