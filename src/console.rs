//! Text command prompt on stdin.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::command::{SharedState, Source};
use crate::listener::ListenerHandle;
use crate::queue::CommandSender;

pub const PLACEHOLDER: &str = "Type your command here...";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Submit(String),
    Voice(bool),
    Quit,
    Ignore,
}

pub fn parse_line(line: &str) -> ConsoleInput {
    let line = line.trim();
    if line.is_empty() || line == PLACEHOLDER {
        return ConsoleInput::Ignore;
    }
    match line.to_lowercase().as_str() {
        "/quit" | "/exit" => ConsoleInput::Quit,
        "/voice on" => ConsoleInput::Voice(true),
        "/voice off" => ConsoleInput::Voice(false),
        _ => ConsoleInput::Submit(line.to_string()),
    }
}

/// Why the prompt stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// `/quit` or `/exit`: the user wants Jarvis to stop.
    Quit,
    /// End of input or a read error. Other command sources may still be
    /// running.
    Closed,
}

/// Read commands from `input` until `/quit`, end of input, or shutdown.
/// Each typed line is queued exactly once. The sender is dropped on
/// return.
pub async fn run_console<R>(
    input: R,
    sender: CommandSender,
    state: Arc<SharedState>,
    listener: Option<Arc<ListenerHandle>>,
) -> ConsoleExit
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    println!("{}", PLACEHOLDER);
    while !state.is_shutdown() {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read stdin: {e}");
                break;
            }
        };
        match parse_line(&line) {
            ConsoleInput::Submit(text) => {
                log::info!("Text command: {}", text);
                sender.enqueue(text, Source::Text);
            }
            ConsoleInput::Voice(on) => match &listener {
                Some(handle) => handle.set_enabled(on),
                None => println!("Voice input is not available."),
            },
            ConsoleInput::Quit => return ConsoleExit::Quit,
            ConsoleInput::Ignore => {}
        }
    }
    ConsoleExit::Closed
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::observer::testing::RecordingObserver;
    use crate::queue::command_queue;

    #[test]
    fn parses_lines() {
        assert_eq!(
            parse_line("  open chrome \n"),
            ConsoleInput::Submit("open chrome".into())
        );
        assert_eq!(parse_line(""), ConsoleInput::Ignore);
        assert_eq!(parse_line("   "), ConsoleInput::Ignore);
        assert_eq!(parse_line(PLACEHOLDER), ConsoleInput::Ignore);
        assert_eq!(parse_line("/QUIT"), ConsoleInput::Quit);
        assert_eq!(parse_line("/exit"), ConsoleInput::Quit);
        assert_eq!(parse_line("/voice off"), ConsoleInput::Voice(false));
        assert_eq!(parse_line("/voice on"), ConsoleInput::Voice(true));
    }

    #[tokio::test]
    async fn end_of_input_keeps_every_submitted_line() {
        let state = Arc::new(SharedState::new());
        let observer = Arc::new(RecordingObserver::default());
        let (tx, mut rx) = command_queue(Arc::clone(&state), observer);
        let input: &[u8] = b"what time is it\n\nhello jarvis\n";

        let exit = run_console(input, tx, Arc::clone(&state), None).await;
        assert_eq!(exit, ConsoleExit::Closed);

        let wait = Duration::from_millis(10);
        let mut got = Vec::new();
        while let Some(cmd) = rx.dequeue_blocking(wait).await {
            assert_eq!(cmd.source(), Source::Text);
            got.push(cmd.text().to_string());
        }
        assert_eq!(got, ["what time is it", "hello jarvis"]);
        assert!(rx.is_finished(), "console drops its sender on return");
    }

    #[tokio::test]
    async fn quit_stops_reading() {
        let state = Arc::new(SharedState::new());
        let observer = Arc::new(RecordingObserver::default());
        let (tx, mut rx) = command_queue(Arc::clone(&state), observer);
        let input: &[u8] = b"open chrome\n/quit\nhello jarvis\n";

        let exit = run_console(input, tx, Arc::clone(&state), None).await;
        assert_eq!(exit, ConsoleExit::Quit);
        let left: Vec<String> = rx
            .take_remaining()
            .iter()
            .map(|c| c.text().to_string())
            .collect();
        assert_eq!(left, ["open chrome"]);
    }
}
