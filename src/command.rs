//! Commands and the small amount of state shared between the input
//! sources, the dispatcher and the voice listener.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Local};
use serde::Serialize;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[cfg_attr(not(feature = "native-audio"), allow(dead_code))]
    Voice,
    Text,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Voice => "voice",
            Source::Text => "text",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single user request waiting for, or undergoing, processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    source: Source,
    enqueued_at: DateTime<Local>,
}

impl Command {
    pub fn new(text: impl Into<String>, source: Source) -> Self {
        Self {
            text: text.into(),
            source,
            enqueued_at: Local::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn enqueued_at(&self) -> DateTime<Local> {
        self.enqueued_at
    }
}

/// State reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ready,
    Queued,
    Processing,
    #[cfg_attr(not(feature = "native-audio"), allow(dead_code))]
    Listening,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ready => "ready",
            Status::Queued => "queued",
            Status::Processing => "processing",
            Status::Listening => "listening",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags read by producers and written by the dispatcher.
///
/// `processing` is only ever set by the single dispatcher worker, so at
/// most one command can be in flight. `pending` counts commands sitting in
/// the queue.
#[derive(Debug, Default)]
pub struct SharedState {
    processing: AtomicBool,
    pending: AtomicUsize,
    shutdown: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub(crate) fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::Release);
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn inc_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_pending(&self) {
        // Saturate rather than wrap if a delivery races a counter reset.
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn processing_state(&self) -> Status {
        if self.is_processing() {
            Status::Processing
        } else if self.pending() > 0 {
            Status::Queued
        } else {
            Status::Ready
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_state_prefers_processing_over_queued() {
        let state = SharedState::new();
        assert_eq!(state.processing_state(), Status::Ready);
        state.inc_pending();
        assert_eq!(state.processing_state(), Status::Queued);
        state.set_processing(true);
        assert_eq!(state.processing_state(), Status::Processing);
        state.set_processing(false);
        state.dec_pending();
        assert_eq!(state.processing_state(), Status::Ready);
    }

    #[test]
    fn pending_never_underflows() {
        let state = SharedState::new();
        state.dec_pending();
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn labels() {
        assert_eq!(Source::Voice.to_string(), "voice");
        assert_eq!(Status::Listening.to_string(), "listening");
        assert_eq!(
            serde_json::to_string(&Status::Processing).unwrap(),
            "\"processing\""
        );
    }
}
