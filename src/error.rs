use std::time::Duration;

use thiserror::Error;

/// Failures of a desktop side effect. These are only ever logged: the
/// reply promising the action has already been sent by the time they
/// happen.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("no launcher known for application '{0}'")]
    UnknownApp(String),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {code}")]
    Exited { program: String, code: i32 },
    #[error("failed to type text: {0}")]
    #[cfg_attr(not(feature = "keystrokes"), allow(dead_code))]
    Keystroke(String),
    #[error("failed to write note: {0}")]
    Note(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    Url(String),
}

/// Failures of the chat backend. The dispatcher replaces all of them with
/// a fixed apology.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("chat backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("chat backend request failed: {0}")]
    Request(String),
}
