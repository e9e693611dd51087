//! Local replies for recognised intents.
//!
//! Handlers that touch the desktop start their side effect through
//! [`SideEffects`] and reply straight away with what they are about to
//! do. The reply is optimistic: it does not wait to find out whether the
//! application actually opened.

use std::sync::Arc;

use chrono::{DateTime, Local};
use reqwest::Url;

use crate::automation::{Automation, SideEffects};
use crate::intents::{self, Intent};
use crate::monitor::SystemMonitor;

const NOTE_PREVIEW_CHARS: usize = 30;

pub struct LocalHandlers {
    automation: Arc<dyn Automation>,
    monitor: Arc<SystemMonitor>,
    effects: Arc<SideEffects>,
}

impl LocalHandlers {
    pub fn new(
        automation: Arc<dyn Automation>,
        monitor: Arc<SystemMonitor>,
        effects: Arc<SideEffects>,
    ) -> Self {
        Self {
            automation,
            monitor,
            effects,
        }
    }

    pub fn effects(&self) -> &Arc<SideEffects> {
        &self.effects
    }

    /// Reply for `intent`. `text` is the original command and `lower` its
    /// lower-cased form. `None` means the handler had nothing to act on
    /// and the command should go to the chat backend.
    pub fn handle(
        &self,
        intent: Intent,
        text: &str,
        lower: &str,
        now: DateTime<Local>,
    ) -> Option<String> {
        match intent {
            Intent::Greeting => Some("Hello, I'm here. How can I assist you?".to_string()),
            Intent::Time => Some(format!("The current time is {}", now.format("%I:%M %p"))),
            Intent::Date => Some(format!("Today is {}", now.format("%B %d, %Y"))),
            Intent::OpenApp => {
                let app = intents::app_name(lower)?;
                let automation = Arc::clone(&self.automation);
                let target = app.clone();
                self.effects
                    .spawn(format!("open {app}"), move || automation.open_app(&target));
                Some(format!("Opening {app}"))
            }
            Intent::PlayMedia => {
                let query = intents::media_query(lower)?;
                let automation = Arc::clone(&self.automation);
                let q = query.clone();
                self.effects
                    .spawn(format!("play {query}"), move || automation.play_media(&q));
                Some(format!("Playing {query} on YouTube"))
            }
            Intent::Search => {
                let query = intents::search_query(lower);
                let url = google_url(query.as_deref());
                let automation = Arc::clone(&self.automation);
                self.effects
                    .spawn("google search", move || automation.open_url(&url));
                Some(match query {
                    Some(q) => format!("Searching Google for {q}"),
                    None => "Opening Google".to_string(),
                })
            }
            Intent::WriteText => {
                let content = intents::note_content(text)?;
                let preview: String = content.chars().take(NOTE_PREVIEW_CHARS).collect();
                let automation = Arc::clone(&self.automation);
                self.effects
                    .spawn("write note", move || automation.write_text(&content));
                Some(format!("Writing to Notepad: {preview}..."))
            }
            Intent::SystemStatus => {
                let s = self.monitor.sample();
                Some(format!(
                    "System Status - CPU: {:.1}%, RAM: {:.1}%",
                    s.cpu_percent, s.memory_percent
                ))
            }
            Intent::Shutdown => Some("Shutdown protocol requires confirmation.".to_string()),
            Intent::Weather => {
                let place = intents::weather_location(lower)?;
                Some(format!("Checking weather for {place}..."))
            }
        }
    }
}

fn google_url(query: Option<&str>) -> String {
    match query {
        Some(q) => Url::parse_with_params("https://www.google.com/search", &[("q", q)])
            .map(String::from)
            .unwrap_or_else(|_| "https://www.google.com/".to_string()),
        None => "https://www.google.com/".to_string(),
    }
}
