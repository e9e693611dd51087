//! FIFO command queue with any number of producers and one consumer.
//!
//! Producers hold a cloneable [`CommandSender`]; the dispatcher owns the
//! only [`CommandReceiver`]. The channel is unbounded so `enqueue` never
//! waits on the consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::command::{Command, SharedState, Source, Status};
use crate::observer::Observer;

pub fn command_queue(
    state: Arc<SharedState>,
    observer: Arc<dyn Observer>,
) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = CommandSender {
        tx,
        state: Arc::clone(&state),
        observer,
    };
    let receiver = CommandReceiver { rx, state };
    (sender, receiver)
}

#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
    state: Arc<SharedState>,
    observer: Arc<dyn Observer>,
}

impl CommandSender {
    /// Append a command to the tail of the queue. Safe to call from plain
    /// threads as well as async tasks; returns immediately.
    ///
    /// If the dispatcher has already gone away the command is dropped and
    /// logged, since there is nobody left to answer it.
    pub fn enqueue(&self, text: impl Into<String>, source: Source) -> Command {
        let command = Command::new(text, source);
        self.state.inc_pending();
        match self.tx.send(command.clone()) {
            Ok(()) => {
                log::debug!("Queued {} command: {}", source, command.text());
                self.observer.on_status(Status::Queued);
            }
            Err(_) => {
                self.state.dec_pending();
                log::warn!("Dispatcher stopped; dropping command: {}", command.text());
            }
        }
        command
    }
}

pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
    state: Arc<SharedState>,
}

impl CommandReceiver {
    /// Wait up to `wait` for the oldest command. `None` means nothing
    /// arrived in time (or every sender is gone); no entry is lost when the
    /// wait expires because `recv` is cancel safe.
    pub async fn dequeue_blocking(&mut self, wait: Duration) -> Option<Command> {
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(command)) => {
                self.state.dec_pending();
                Some(command)
            }
            Ok(None) => {
                // All senders dropped. Sleep out the interval so callers
                // polling in a loop don't spin.
                tokio::time::sleep(wait).await;
                None
            }
            Err(_) => None,
        }
    }

    /// Every sender is gone and nothing is left to deliver.
    pub fn is_finished(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }

    /// Take whatever is still queued without waiting.
    pub fn take_remaining(&mut self) -> Vec<Command> {
        let mut left = Vec::new();
        while let Ok(command) = self.rx.try_recv() {
            self.state.dec_pending();
            left.push(command);
        }
        left
    }
}
