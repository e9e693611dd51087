//! Runtime configuration from environment variables (optionally loaded
//! from a `.env` file first).
//!
//! Every setting has a default; a value that fails to parse is reported
//! and the default is used instead.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::dispatcher::DispatchSettings;
use crate::speech::MicSelection;
use crate::tts_engine::VoiceEngine;

#[derive(Debug, Clone)]
pub struct Config {
    pub model_name: String,
    /// Ollama server root with scheme, host and port. `None` leaves the
    /// choice to the client's own default.
    pub ollama_url: Option<Url>,
    pub system_prompt: String,
    pub backend_timeout: Duration,
    /// Voice input is unavailable when no model is configured.
    pub vosk_model_path: Option<String>,
    #[cfg_attr(not(feature = "native-audio"), allow(dead_code))]
    pub voice_input: bool,
    #[cfg_attr(not(feature = "native-audio"), allow(dead_code))]
    pub phrase_limit: Duration,
    #[cfg_attr(not(feature = "native-audio"), allow(dead_code))]
    pub mic: MicSelection,
    pub voice_engine: VoiceEngine,
    pub wait_for_speech: bool,
    pub speech_wait_timeout: Duration,
    pub poll_interval: Duration,
    pub monitor_interval: Duration,
    pub text_editor: Option<String>,
    pub status_files: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str, default| parse_flag(key, get(key), default);
        let secs = |key: &str, default: u64| Duration::from_secs(parse_or(key, get(key), default));

        let voice_name = get("VOICE_NAME");
        let voice_engine = match get("VOICE_ENGINE").map(|v| v.to_lowercase()).as_deref() {
            None | Some("native") => VoiceEngine::Native { voice: voice_name },
            Some("command") | Some("rhvoice") => {
                let command = get("VOICE_COMMAND").unwrap_or_else(|| "espeak".to_string());
                let mut parts = command.split_whitespace().map(str::to_string);
                let program = parts.next().unwrap_or_else(|| "espeak".to_string());
                VoiceEngine::Command {
                    program,
                    args: parts.collect(),
                }
            }
            Some("silent") | Some("none") => VoiceEngine::Silent,
            Some(other) => {
                log::warn!("Unknown VOICE_ENGINE '{}'; using native", other);
                VoiceEngine::Native { voice: voice_name }
            }
        };

        Self {
            model_name: get("MODEL_NAME").unwrap_or_else(|| "qwen2.5:7b".to_string()),
            ollama_url: ollama_url(get("OLLAMA_HOST"), get("OLLAMA_PORT")),
            system_prompt: get("SYSTEM_PROMPT")
                .unwrap_or_else(|| DispatchSettings::default().system_prompt),
            backend_timeout: secs("BACKEND_TIMEOUT", 30),
            vosk_model_path: get("VOSK_MODEL_PATH"),
            voice_input: flag("VOICE_INPUT", true),
            phrase_limit: secs("PHRASE_TIME_LIMIT", 5),
            mic: MicSelection {
                index: parse_opt("MIC_INDEX", get("MIC_INDEX")),
                name_keyword: get("MIC_NAME_KEYWORD"),
            },
            voice_engine,
            wait_for_speech: flag("WAIT_FOR_SPEECH", true),
            speech_wait_timeout: secs("SPEECH_WAIT_TIMEOUT", 60),
            poll_interval: Duration::from_millis(parse_or(
                "POLL_INTERVAL_MS",
                get("POLL_INTERVAL_MS"),
                100,
            )),
            monitor_interval: secs("MONITOR_INTERVAL", 5),
            text_editor: get("TEXT_EDITOR"),
            status_files: flag("STATUS_FILES", true),
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            system_prompt: self.system_prompt.clone(),
            poll_interval: self.poll_interval,
            backend_timeout: self.backend_timeout,
            wait_for_speech: self.wait_for_speech,
            speech_wait_timeout: self.speech_wait_timeout,
            ..DispatchSettings::default()
        }
    }
}

const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

/// Accepts `http://host`, `https://host:port` and the bare `host[:port]`
/// form Ollama itself uses for `OLLAMA_HOST`. `OLLAMA_PORT` wins over a
/// port in the host; with neither, the standard Ollama port is used.
fn ollama_url(host: Option<String>, port: Option<String>) -> Option<Url> {
    let mut url = match host.as_deref() {
        None => parse_http_url(DEFAULT_OLLAMA_HOST),
        Some(raw) => parse_http_url(raw).or_else(|| {
            log::warn!("Ignoring invalid OLLAMA_HOST={:?}; using default", raw);
            parse_http_url(DEFAULT_OLLAMA_HOST)
        }),
    }?;
    let port = match port {
        Some(_) => Some(parse_or("OLLAMA_PORT", port, DEFAULT_OLLAMA_PORT)),
        None if url.port().is_none() => Some(DEFAULT_OLLAMA_PORT),
        None => None,
    };
    if let Some(port) = port {
        // Cannot fail: `parse_http_url` only returns http(s) URLs with a host.
        let _ = url.set_port(Some(port));
    }
    Some(url)
}

fn parse_http_url(raw: &str) -> Option<Url> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    Url::parse(&with_scheme)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        None => default,
        Some(v) => v.parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {}={:?}; using default", key, v);
            default
        }),
    }
}

fn parse_opt<T: FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let v = value?;
    match v.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring invalid {}={:?}", key, v);
            None
        }
    }
}

fn parse_flag(key: &str, value: Option<String>, default: bool) -> bool {
    match value.map(|v| v.to_lowercase()).as_deref() {
        None => default,
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => {
            log::warn!("Ignoring invalid {}={:?}; using default", key, other);
            default
        }
    }
}
